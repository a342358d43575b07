use crate::services::helix::HelixFailure;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Twitch API error: {0}")]
    TwitchApi(String),

    #[error("Helix API returned {}: {}", .0.status, .0.body)]
    HelixStatus(HelixFailure),

    #[error("Gave up deleting subscription {subscription_id} after {attempts} attempts")]
    RetriesExhausted {
        subscription_id: String,
        attempts: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// The Helix failure behind this error, if the API answered with a non-2xx status.
    pub fn helix_failure(&self) -> Option<&HelixFailure> {
        match self {
            AppError::HelixStatus(failure) => Some(failure),
            _ => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
