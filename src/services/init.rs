//! Initialization helpers for the reconciler:
//! - database connection + migrations
//! - one-shot and periodic reconciliation runs
//!
//! `main.rs` only wires these together.

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::{Config, JobMode, ReconcileConfig};
use crate::services::reconcile::ReconciliationJob;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Open the SQLite account store and run migrations.
///
/// Creates the parent directory for the database file when needed.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Run the configured reconciliation entry point once.
pub async fn run_reconciliation(job: &ReconciliationJob, config: &ReconcileConfig) {
    match config.mode {
        JobMode::Status => {
            job.sweep_statuses(&config.statuses, config.flag_accounts, config.single_loop)
                .await;
        }
        JobMode::Cost => {
            job.sweep_costly(config.single_loop).await;
        }
        JobMode::Count => {
            job.count(None).await;
        }
    }
}

/// Spawn the periodic reconciliation worker.
///
/// A run in progress is never interrupted; the shutdown notification is
/// observed between runs.
pub fn spawn_reconcile_worker(
    job: Arc<ReconciliationJob>,
    config: ReconcileConfig,
    interval_seconds: u64,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        loop {
            tracing::info!("Starting EventSub reconciliation ({:?} mode)", config.mode);
            run_reconciliation(&job, &config).await;

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Reconciliation worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval_seconds)) => {}
            }
        }
    })
}
