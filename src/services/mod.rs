pub mod deleter;
pub mod helix;
pub mod init;
pub mod pager;
pub mod reconcile;
pub mod refresh;

#[cfg(test)]
pub mod testing;
