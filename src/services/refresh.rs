//! Batches "needs credential refresh" flags for Twitch accounts.
//!
//! Account ids are collected into a set and written to the account store once
//! the set has been idle for the debounce window, or straight away when it
//! grows past `max_pending`. Writes go out in fixed-size chunks; the first
//! failing chunk aborts the rest of that flush and its accounts are not
//! requeued.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::db::{AccountRepository, TWITCH_PROVIDER};
use crate::error::AppResult;

/// Destination for refresh flags.
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    /// Set `requires_refresh` on every Twitch account in `provider_account_ids`.
    /// Returns the number of rows touched.
    async fn mark_requires_refresh(&self, provider_account_ids: &[String]) -> AppResult<u64>;
}

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn mark_requires_refresh(&self, provider_account_ids: &[String]) -> AppResult<u64> {
        AccountRepository::mark_requires_refresh(&self.pool, TWITCH_PROVIDER, provider_account_ids)
            .await
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Accounts taken out of the pending set.
    pub requested: usize,
    pub chunks_total: usize,
    pub chunks_committed: usize,
    pub rows_updated: u64,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.chunks_committed == self.chunks_total
    }
}

struct BatcherInner {
    store: Arc<dyn AccountStore>,
    config: RefreshConfig,
    pending: Mutex<HashSet<String>>,
    dirty: Notify,
}

#[derive(Clone)]
pub struct RefreshFlagBatcher {
    inner: Arc<BatcherInner>,
}

impl RefreshFlagBatcher {
    /// A batcher without a debounce task; pending accounts only go out through
    /// [`RefreshFlagBatcher::flush`] or the `max_pending` threshold.
    pub fn new(store: Arc<dyn AccountStore>, config: RefreshConfig) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                store,
                config,
                pending: Mutex::new(HashSet::new()),
                dirty: Notify::new(),
            }),
        }
    }

    /// Create a batcher and spawn its debounce task. The task flushes after
    /// every idle window and does a final flush when `shutdown` fires.
    pub fn spawn(
        store: Arc<dyn AccountStore>,
        config: RefreshConfig,
        shutdown: broadcast::Sender<()>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let batcher = Self::new(store, config);
        let shutdown_rx = shutdown.subscribe();
        let worker = batcher.clone();
        let handle = tokio::spawn(async move {
            worker.run_debouncer(shutdown_rx).await;
        });
        (batcher, handle)
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Queue `account_id` for a refresh flag. Repeated ids collapse into one.
    pub async fn mark_account_dirty(&self, account_id: &str) {
        let (inserted, pending_len) = {
            let mut pending = self.inner.pending.lock().await;
            let inserted = pending.insert(account_id.to_string());
            (inserted, pending.len())
        };

        // Every mark restarts the idle window, repeats included.
        self.inner.dirty.notify_one();

        if inserted
            && self.inner.config.max_pending > 0 && pending_len >= self.inner.config.max_pending {
            debug!(
                "Refresh queue reached {} accounts; flushing early",
                pending_len
            );
            self.flush().await;
        }
    }

    /// Write every pending account to the store now.
    pub async fn flush(&self) -> FlushReport {
        let mut batch: Vec<String> = {
            let mut pending = self.inner.pending.lock().await;
            std::mem::take(&mut *pending).into_iter().collect()
        };

        if batch.is_empty() {
            return FlushReport::default();
        }
        batch.sort();

        let chunk_size = self.inner.config.chunk_size.max(1);
        let mut report = FlushReport {
            requested: batch.len(),
            chunks_total: batch.len().div_ceil(chunk_size),
            ..FlushReport::default()
        };

        for (index, chunk) in batch.chunks(chunk_size).enumerate() {
            match self.inner.store.mark_requires_refresh(chunk).await {
                Ok(rows) => {
                    report.chunks_committed += 1;
                    report.rows_updated += rows;
                }
                Err(e) => {
                    warn!(
                        "Failed to flag accounts for refresh (chunk {}/{}, {} accounts): {}. Abandoning remaining chunks",
                        index + 1,
                        report.chunks_total,
                        chunk.len(),
                        e
                    );
                    break;
                }
            }
        }

        if report.is_complete() {
            info!(
                "Flagged {} account(s) for refresh ({} chunks, {} rows updated)",
                report.requested, report.chunks_total, report.rows_updated
            );
        } else {
            warn!(
                "Refresh flush incomplete: {}/{} chunks committed for {} account(s); the rest are dropped",
                report.chunks_committed, report.chunks_total, report.requested
            );
        }

        report
    }

    async fn run_debouncer(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let window = StdDuration::from_millis(self.inner.config.debounce_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Refresh batcher shutting down ({} pending)", self.pending_len().await);
                    self.flush().await;
                    return;
                }
                _ = self.inner.dirty.notified() => {}
            }

            // Restart the window on every new account until things go quiet.
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Refresh batcher shutting down");
                        self.flush().await;
                        return;
                    }
                    _ = self.inner.dirty.notified() => continue,
                    _ = tokio::time::sleep(window) => break,
                }
            }

            self.flush().await;
        }
    }
}
