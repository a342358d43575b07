use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::TwitchConfig;
use crate::error::{AppError, AppResult};

const RATELIMIT_REMAINING_HEADER: &str = "ratelimit-remaining";
const RATELIMIT_RESET_HEADER: &str = "ratelimit-reset";

// ============================================================================
// EventSub Types
// ============================================================================

/// Status Twitch reports for an EventSub subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Enabled,
    WebhookCallbackVerificationPending,
    WebhookCallbackVerificationFailed,
    NotificationFailuresExceeded,
    AuthorizationRevoked,
    ModeratorRemoved,
    UserRemoved,
    VersionRemoved,
    BetaMaintenance,
    WebsocketDisconnected,
    WebsocketFailedPingPong,
    WebsocketReceivedInboundTraffic,
    WebsocketConnectionUnused,
    WebsocketInternalError,
    WebsocketNetworkTimeout,
    WebsocketNetworkError,
    /// Anything Twitch adds later. Never sent as a filter.
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    const KNOWN: [SubscriptionStatus; 16] = [
        SubscriptionStatus::Enabled,
        SubscriptionStatus::WebhookCallbackVerificationPending,
        SubscriptionStatus::WebhookCallbackVerificationFailed,
        SubscriptionStatus::NotificationFailuresExceeded,
        SubscriptionStatus::AuthorizationRevoked,
        SubscriptionStatus::ModeratorRemoved,
        SubscriptionStatus::UserRemoved,
        SubscriptionStatus::VersionRemoved,
        SubscriptionStatus::BetaMaintenance,
        SubscriptionStatus::WebsocketDisconnected,
        SubscriptionStatus::WebsocketFailedPingPong,
        SubscriptionStatus::WebsocketReceivedInboundTraffic,
        SubscriptionStatus::WebsocketConnectionUnused,
        SubscriptionStatus::WebsocketInternalError,
        SubscriptionStatus::WebsocketNetworkTimeout,
        SubscriptionStatus::WebsocketNetworkError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Enabled => "enabled",
            SubscriptionStatus::WebhookCallbackVerificationPending => {
                "webhook_callback_verification_pending"
            }
            SubscriptionStatus::WebhookCallbackVerificationFailed => {
                "webhook_callback_verification_failed"
            }
            SubscriptionStatus::NotificationFailuresExceeded => "notification_failures_exceeded",
            SubscriptionStatus::AuthorizationRevoked => "authorization_revoked",
            SubscriptionStatus::ModeratorRemoved => "moderator_removed",
            SubscriptionStatus::UserRemoved => "user_removed",
            SubscriptionStatus::VersionRemoved => "version_removed",
            SubscriptionStatus::BetaMaintenance => "beta_maintenance",
            SubscriptionStatus::WebsocketDisconnected => "websocket_disconnected",
            SubscriptionStatus::WebsocketFailedPingPong => "websocket_failed_ping_pong",
            SubscriptionStatus::WebsocketReceivedInboundTraffic => {
                "websocket_received_inbound_traffic"
            }
            SubscriptionStatus::WebsocketConnectionUnused => "websocket_connection_unused",
            SubscriptionStatus::WebsocketInternalError => "websocket_internal_error",
            SubscriptionStatus::WebsocketNetworkTimeout => "websocket_network_timeout",
            SubscriptionStatus::WebsocketNetworkError => "websocket_network_error",
            SubscriptionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::KNOWN
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::Config(format!("Unknown subscription status: {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubCondition {
    #[serde(default)]
    pub broadcaster_user_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl EventSubCondition {
    /// The account that owns the subscription: the broadcaster, or the user for
    /// user-scoped subscription types.
    pub fn owner_id(&self) -> Option<&str> {
        self.broadcaster_user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.user_id.as_deref().filter(|id| !id.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventSubSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    #[serde(rename = "type", default)]
    pub subscription_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub condition: EventSubCondition,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One page of `GET /eventsub/subscriptions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionPage {
    #[serde(rename = "data")]
    pub items: Vec<EventSubSubscription>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_cost: u64,
    #[serde(default)]
    pub max_total_cost: u64,
    #[serde(default)]
    pub pagination: Pagination,
}

impl SubscriptionPage {
    /// Cursor for the next page; `None` on the last page.
    pub fn cursor(&self) -> Option<&str> {
        self.pagination
            .cursor
            .as_deref()
            .filter(|cursor| !cursor.is_empty())
    }
}

// ============================================================================
// Rate limit / response types
// ============================================================================

/// Rate limit state echoed by Helix on every response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: Option<u64>,
    /// Bucket reset time in unix milliseconds.
    pub reset_at_ms: Option<i64>,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };

        RateLimit {
            remaining: read(RATELIMIT_REMAINING_HEADER).and_then(|s| s.parse().ok()),
            reset_at_ms: read(RATELIMIT_RESET_HEADER)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| secs.checked_mul(1000)),
        }
    }

    /// True when the bucket is empty and has not reset yet.
    pub fn is_exhausted(&self, now_ms: i64) -> bool {
        self.remaining == Some(0) && self.reset_at_ms.is_some_and(|reset| now_ms < reset)
    }

    /// Time left until the bucket resets, if it is currently exhausted.
    pub fn time_until_reset(&self, now_ms: i64) -> Option<StdDuration> {
        if !self.is_exhausted(now_ms) {
            return None;
        }
        self.reset_at_ms
            .map(|reset| StdDuration::from_millis((reset - now_ms) as u64))
    }
}

#[derive(Debug, Clone)]
pub struct HelixResponse {
    pub status: StatusCode,
    pub body: String,
    pub rate_limit: RateLimit,
}

impl HelixResponse {
    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse Helix response: {}", e)))
    }
}

/// A Helix call that came back with a non-2xx status.
#[derive(Debug, Clone)]
pub struct HelixFailure {
    pub status: StatusCode,
    pub body: String,
    pub rate_limit: RateLimit,
}

// ============================================================================
// Subscription registry API
// ============================================================================

/// The EventSub registry operations the reconciler relies on.
#[async_trait]
pub trait SubscriptionApi: Send + Sync + 'static {
    async fn list_subscriptions(
        &self,
        status: Option<SubscriptionStatus>,
        after: Option<&str>,
    ) -> AppResult<HelixResponse>;

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<HelixResponse>;
}

/// Thin Helix client. Performs exactly one HTTP call per operation; retry
/// policy belongs to the callers.
#[derive(Debug, Clone)]
pub struct HelixClient {
    client: Client,
    api_url: String,
    client_id: String,
    access_token: String,
}

impl HelixClient {
    pub fn new(config: &TwitchConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            access_token: config.app_access_token.clone(),
        })
    }

    /// Send an authenticated request and capture status, body and rate limit headers.
    pub async fn send(&self, request: RequestBuilder) -> AppResult<HelixResponse> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Client-Id", &self.client_id)
            .send()
            .await?;

        let status = response.status();
        let rate_limit = RateLimit::from_headers(response.headers());
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AppError::HelixStatus(HelixFailure {
                status,
                body,
                rate_limit,
            }));
        }

        Ok(HelixResponse {
            status,
            body,
            rate_limit,
        })
    }

    fn subscriptions_url(&self) -> String {
        format!("{}/eventsub/subscriptions", self.api_url)
    }
}

#[async_trait]
impl SubscriptionApi for HelixClient {
    async fn list_subscriptions(
        &self,
        status: Option<SubscriptionStatus>,
        after: Option<&str>,
    ) -> AppResult<HelixResponse> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.as_str()));
        }
        if let Some(cursor) = after {
            query.push(("after", cursor));
        }

        self.send(self.client.get(self.subscriptions_url()).query(&query))
            .await
    }

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<HelixResponse> {
        self.send(
            self.client
                .delete(self.subscriptions_url())
                .query(&[("id", subscription_id)]),
        )
        .await
    }
}
