use std::env;
use std::str::FromStr;

use serde::Deserialize;

use crate::services::helix::SubscriptionStatus;

const DEFAULT_TWITCH_API_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub twitch: TwitchConfig,
    pub reconcile: ReconcileConfig,
    pub deleter: DeleterConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    /// App access token used for Helix calls. Token acquisition happens elsewhere;
    /// read from env var `TWITCH_APP_ACCESS_TOKEN`.
    pub app_access_token: String,
    pub api_url: String,
}

/// Which reconciliation entry point the binary runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Delete subscriptions in the configured statuses.
    Status,
    /// Delete every subscription carrying a positive cost.
    Cost,
    /// Only report how many subscriptions the registry holds.
    Count,
}

impl FromStr for JobMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "status" => Ok(JobMode::Status),
            "cost" => Ok(JobMode::Cost),
            "count" => Ok(JobMode::Count),
            _ => Err(ConfigError::InvalidValue("RECONCILE_MODE".to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub mode: JobMode,
    /// Statuses swept in `status` mode, in order.
    pub statuses: Vec<SubscriptionStatus>,
    /// Whether owners of deleted subscriptions get flagged for credential refresh.
    pub flag_accounts: bool,
    /// Stop after the first page of every enumeration.
    pub single_loop: bool,
    /// Re-run the job on this period. `None` runs once and exits.
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleterConfig {
    /// Maximum attempts per subscription before giving up.
    pub max_attempts: u32,
    /// Starting value of the tracked retry delay (seconds).
    pub initial_retry_delay_seconds: f64,
    /// Proactive pause is taken every this many delete calls.
    pub pause_every: u64,
    /// Length of the proactive pause (seconds).
    pub pause_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Idle window before pending accounts are flushed.
    pub debounce_ms: u64,
    /// Accounts updated per store call.
    pub chunk_size: usize,
    /// Pending set size that forces an immediate flush.
    pub max_pending: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let statuses = match env::var("RECONCILE_STATUSES") {
            Ok(raw) => parse_statuses(&raw)?,
            Err(_) => defaults.reconcile.statuses.clone(),
        };

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/app.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            twitch: TwitchConfig {
                client_id: env::var("TWITCH_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()))?,
                app_access_token: env::var("TWITCH_APP_ACCESS_TOKEN").map_err(|_| {
                    ConfigError::MissingEnv("TWITCH_APP_ACCESS_TOKEN".to_string())
                })?,
                api_url: env::var("TWITCH_API_URL")
                    .unwrap_or_else(|_| DEFAULT_TWITCH_API_URL.to_string()),
            },
            reconcile: ReconcileConfig {
                mode: match env::var("RECONCILE_MODE") {
                    Ok(v) => v.parse()?,
                    Err(_) => JobMode::Status,
                },
                statuses,
                flag_accounts: parse_bool(env::var("RECONCILE_FLAG_ACCOUNTS").ok(), true),
                single_loop: parse_bool(env::var("RECONCILE_SINGLE_LOOP").ok(), false),
                interval_seconds: match env::var("RECONCILE_INTERVAL_SECONDS") {
                    Ok(v) => Some(v.parse().map_err(|_| {
                        ConfigError::InvalidValue("RECONCILE_INTERVAL_SECONDS".to_string())
                    })?),
                    Err(_) => None,
                },
            },
            deleter: DeleterConfig {
                max_attempts: env::var("DELETE_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u32),
                initial_retry_delay_seconds: env::var("DELETE_INITIAL_RETRY_DELAY_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60.0),
                pause_every: env::var("DELETE_PAUSE_EVERY")
                    .unwrap_or_else(|_| "800".to_string())
                    .parse()
                    .unwrap_or(800u64),
                pause_seconds: env::var("DELETE_PAUSE_SECONDS")
                    .unwrap_or_else(|_| "65".to_string())
                    .parse()
                    .unwrap_or(65u64),
            },
            refresh: RefreshConfig {
                debounce_ms: env::var("REFRESH_DEBOUNCE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500u64),
                chunk_size: env::var("REFRESH_CHUNK_SIZE")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50usize),
                max_pending: env::var("REFRESH_MAX_PENDING")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000usize),
            },
        })
    }
}

/// Accepts "true"/"false", "1"/"0", "yes"/"no"; anything else falls back to `default`.
fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        None => default,
    }
}

fn parse_statuses(raw: &str) -> Result<Vec<SubscriptionStatus>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SubscriptionStatus>()
                .map_err(|_| ConfigError::InvalidValue(format!("RECONCILE_STATUSES ({})", s)))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                url: "sqlite://data/app.db".to_string(),
                max_connections: 5,
            },
            twitch: TwitchConfig {
                client_id: String::new(),
                app_access_token: String::new(),
                api_url: DEFAULT_TWITCH_API_URL.to_string(),
            },
            reconcile: ReconcileConfig {
                mode: JobMode::Status,
                statuses: vec![
                    SubscriptionStatus::AuthorizationRevoked,
                    SubscriptionStatus::UserRemoved,
                    SubscriptionStatus::WebhookCallbackVerificationFailed,
                ],
                flag_accounts: true,
                single_loop: false,
                interval_seconds: None,
            },
            deleter: DeleterConfig {
                max_attempts: 5,
                initial_retry_delay_seconds: 60.0,
                pause_every: 800,
                pause_seconds: 65,
            },
            refresh: RefreshConfig {
                debounce_ms: 500,
                chunk_size: 50,
                max_pending: 1000,
            },
        }
    }
}
