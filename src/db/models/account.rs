use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Provider name stored for Twitch accounts.
pub const TWITCH_PROVIDER: &str = "twitch";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub provider: String,
    pub provider_account_id: String,
    /// Set when the account's upstream credentials must be re-acquired.
    pub requires_refresh: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
