pub mod account;

pub use self::account::*;
