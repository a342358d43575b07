use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::DeleterConfig;
use crate::error::{AppError, AppResult};
use crate::services::helix::SubscriptionApi;

/// Extra wait on top of the advertised bucket reset.
const RESET_BUFFER: StdDuration = StdDuration::from_millis(100);
const RETRY_DELAY_GROWTH: f64 = 1.2;

/// Deletes EventSub subscriptions one at a time while staying inside Helix's
/// rate limit.
///
/// Two throttles apply: a reactive one that waits for the bucket reset whenever
/// Helix reports an empty bucket, and a proactive one that pauses every
/// `pause_every` calls made through this deleter.
pub struct SubscriptionDeleter {
    api: Arc<dyn SubscriptionApi>,
    config: DeleterConfig,
    request_count: AtomicU64,
}

impl SubscriptionDeleter {
    pub fn new(api: Arc<dyn SubscriptionApi>, config: DeleterConfig) -> Self {
        Self {
            api,
            config,
            request_count: AtomicU64::new(0),
        }
    }

    /// Number of `delete` calls made through this deleter so far.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn delete(&self, subscription_id: &str) -> AppResult<()> {
        let previous = self.request_count.fetch_add(1, Ordering::SeqCst);
        if previous > 0 && self.config.pause_every > 0 && previous % self.config.pause_every == 0 {
            info!(
                "Issued {} EventSub deletions; pausing {}s before continuing",
                previous, self.config.pause_seconds
            );
            tokio::time::sleep(StdDuration::from_secs(self.config.pause_seconds)).await;
        }

        let max_attempts = self.config.max_attempts;
        // Tracked for logging only: the wait always comes from the server's reset time.
        let mut retry_delay = self.config.initial_retry_delay_seconds;
        let mut attempt: u32 = 0;

        while attempt < max_attempts {
            let err = match self.api.delete_subscription(subscription_id).await {
                Ok(_) => {
                    debug!("Deleted EventSub subscription {}", subscription_id);
                    return Ok(());
                }
                Err(e) => e,
            };
            attempt += 1;

            let now_ms = Utc::now().timestamp_millis();
            let reset_wait = err
                .helix_failure()
                .and_then(|failure| failure.rate_limit.time_until_reset(now_ms));

            match reset_wait {
                Some(wait) => {
                    retry_delay *= RETRY_DELAY_GROWTH;
                    warn!(
                        "Rate limited deleting EventSub {} (attempt {}/{}); waiting {}ms for reset (retry delay now {:.1}s)",
                        subscription_id,
                        attempt,
                        max_attempts,
                        (wait + RESET_BUFFER).as_millis(),
                        retry_delay
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(wait + RESET_BUFFER).await;
                    }
                }
                None => {
                    warn!(
                        "Failed to delete EventSub {} (attempt {}/{}): {}",
                        subscription_id, attempt, max_attempts, err
                    );
                }
            }
        }

        error!(
            "Giving up on EventSub subscription {} after {} attempts",
            subscription_id, attempt
        );
        Err(AppError::RetriesExhausted {
            subscription_id: subscription_id.to_string(),
            attempts: attempt,
        })
    }
}
