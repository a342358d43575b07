//! In-memory fakes for the EventSub registry and the account store.
//!
//! Pages are addressed by index; the cursor handed out for page `n` is `n + 1`
//! as a string, so a fake registry behaves like Helix pagination without
//! needing a server.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::error::{AppError, AppResult};
use crate::services::helix::{
    EventSubCondition, EventSubSubscription, HelixFailure, HelixResponse, Pagination, RateLimit,
    SubscriptionApi, SubscriptionPage, SubscriptionStatus,
};
use crate::services::refresh::AccountStore;

pub fn subscription(id: &str, status: SubscriptionStatus, cost: u64, owner: &str) -> EventSubSubscription {
    EventSubSubscription {
        id: id.to_string(),
        status,
        subscription_type: "stream.online".to_string(),
        version: "1".to_string(),
        cost,
        condition: EventSubCondition {
            broadcaster_user_id: Some(owner.to_string()),
            user_id: None,
        },
        created_at: None,
    }
}

/// How the fake answers one delete call.
#[derive(Debug, Clone)]
pub enum DeleteReply {
    Deleted,
    /// 429 with an empty bucket resetting `reset_in` from now.
    RateLimited { reset_in: StdDuration },
    /// Any other failure, with a non-empty bucket.
    Fail(StatusCode),
}

#[derive(Default)]
pub struct FakeRegistry {
    pages: Mutex<HashMap<Option<SubscriptionStatus>, Vec<Vec<EventSubSubscription>>>>,
    list_failures: Mutex<HashMap<(Option<SubscriptionStatus>, usize), StatusCode>>,
    delete_replies: Mutex<VecDeque<DeleteReply>>,
    pub list_calls: Mutex<Vec<(Option<SubscriptionStatus>, Option<String>)>>,
    pub delete_calls: Mutex<Vec<(String, Instant)>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(
        self,
        status: Option<SubscriptionStatus>,
        pages: Vec<Vec<EventSubSubscription>>,
    ) -> Self {
        self.pages.lock().unwrap().insert(status, pages);
        self
    }

    pub fn failing_list(self, status: Option<SubscriptionStatus>, page: usize, code: StatusCode) -> Self {
        self.list_failures.lock().unwrap().insert((status, page), code);
        self
    }

    /// Queue replies for upcoming delete calls; once drained every delete succeeds.
    pub fn with_delete_replies(self, replies: Vec<DeleteReply>) -> Self {
        self.delete_replies.lock().unwrap().extend(replies);
        self
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.delete_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }
}

fn ok_response(status: StatusCode, body: String) -> HelixResponse {
    HelixResponse {
        status,
        body,
        rate_limit: RateLimit {
            remaining: Some(799),
            reset_at_ms: Some(Utc::now().timestamp_millis() + 60_000),
        },
    }
}

#[async_trait]
impl SubscriptionApi for FakeRegistry {
    async fn list_subscriptions(
        &self,
        status: Option<SubscriptionStatus>,
        after: Option<&str>,
    ) -> AppResult<HelixResponse> {
        self.list_calls
            .lock()
            .unwrap()
            .push((status, after.map(str::to_string)));

        let index: usize = after.and_then(|c| c.parse().ok()).unwrap_or(0);

        if let Some(code) = self.list_failures.lock().unwrap().get(&(status, index)) {
            return Err(AppError::HelixStatus(HelixFailure {
                status: *code,
                body: "list failed".to_string(),
                rate_limit: RateLimit::default(),
            }));
        }

        let pages = self.pages.lock().unwrap();
        let all = pages.get(&status).cloned().unwrap_or_default();
        let items = all.get(index).cloned().unwrap_or_default();
        let cursor = if index + 1 < all.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        let total: usize = all.iter().map(Vec::len).sum();
        let total_cost: u64 = all.iter().flatten().map(|s| s.cost).sum();

        let page = SubscriptionPage {
            items,
            total: total as u64,
            total_cost,
            max_total_cost: 10_000,
            pagination: Pagination { cursor },
        };
        let body = serde_json::to_string(&page).map_err(|e| AppError::Internal(e.into()))?;

        Ok(ok_response(StatusCode::OK, body))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<HelixResponse> {
        self.delete_calls
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), Instant::now()));

        let reply = self
            .delete_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeleteReply::Deleted);

        match reply {
            DeleteReply::Deleted => Ok(ok_response(StatusCode::NO_CONTENT, String::new())),
            DeleteReply::RateLimited { reset_in } => Err(AppError::HelixStatus(HelixFailure {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: "Too Many Requests".to_string(),
                rate_limit: RateLimit {
                    remaining: Some(0),
                    reset_at_ms: Some(Utc::now().timestamp_millis() + reset_in.as_millis() as i64),
                },
            })),
            DeleteReply::Fail(code) => Err(AppError::HelixStatus(HelixFailure {
                status: code,
                body: "boom".to_string(),
                rate_limit: RateLimit {
                    remaining: Some(500),
                    reset_at_ms: Some(Utc::now().timestamp_millis() + 60_000),
                },
            })),
        }
    }
}

/// Records every chunk it is asked to flag; optionally fails on one call.
#[derive(Default)]
pub struct FakeAccountStore {
    pub chunks: Mutex<Vec<Vec<String>>>,
    fail_on_call: Option<usize>,
}

impl FakeAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th call (1-based).
    pub fn failing_on(n: usize) -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            fail_on_call: Some(n),
        }
    }

    pub fn calls(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn flagged(&self) -> Vec<String> {
        self.chunks.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl AccountStore for FakeAccountStore {
    async fn mark_requires_refresh(&self, provider_account_ids: &[String]) -> AppResult<u64> {
        let mut chunks = self.chunks.lock().unwrap();
        chunks.push(provider_account_ids.to_vec());

        if self.fail_on_call == Some(chunks.len()) {
            return Err(AppError::TwitchApi("account store unavailable".to_string()));
        }

        Ok(provider_account_ids.len() as u64)
    }
}
