use std::sync::Arc;

use tracing::{debug, warn};

use crate::services::helix::{SubscriptionApi, SubscriptionPage, SubscriptionStatus};

/// Cursor over `GET /eventsub/subscriptions`.
///
/// The caller drives it with `while let Some(page) = pager.next_page().await`,
/// so page N is fully processed before page N+1 is requested. Any failure
/// ends the enumeration for this filter only; it is logged, never returned.
pub struct SubscriptionPager {
    api: Arc<dyn SubscriptionApi>,
    status: Option<SubscriptionStatus>,
    single_page: bool,
    cursor: Option<String>,
    pages_fetched: usize,
    finished: bool,
}

impl SubscriptionPager {
    pub fn new(
        api: Arc<dyn SubscriptionApi>,
        status: Option<SubscriptionStatus>,
        single_page: bool,
    ) -> Self {
        Self {
            api,
            status,
            single_page,
            cursor: None,
            pages_fetched: 0,
            finished: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub async fn next_page(&mut self) -> Option<SubscriptionPage> {
        if self.finished {
            return None;
        }

        let filter = self.status.map(|s| s.as_str()).unwrap_or("any");

        let response = match self
            .api
            .list_subscriptions(self.status, self.cursor.as_deref())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "Failed to list EventSub subscriptions (status={}, page={}): {}",
                    filter,
                    self.pages_fetched + 1,
                    e
                );
                self.finished = true;
                return None;
            }
        };

        let page: SubscriptionPage = match response.json() {
            Ok(page) => page,
            Err(e) => {
                warn!("Dropping EventSub listing for status={}: {}", filter, e);
                self.finished = true;
                return None;
            }
        };

        self.pages_fetched += 1;

        let next = page.cursor().map(str::to_string);
        if next.is_some() && next == self.cursor {
            warn!(
                "Helix returned the same cursor twice for status={}; stopping",
                filter
            );
            self.finished = true;
        }
        self.cursor = next;
        if self.cursor.is_none() || self.single_page {
            self.finished = true;
        }

        debug!(
            "Fetched EventSub page {} for status={} ({} items, more={})",
            self.pages_fetched,
            filter,
            page.items.len(),
            !self.finished
        );

        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{subscription, FakeRegistry};
    use reqwest::StatusCode;

    const REMOVED: SubscriptionStatus = SubscriptionStatus::UserRemoved;

    fn three_pages() -> FakeRegistry {
        FakeRegistry::new().with_pages(
            Some(REMOVED),
            vec![
                vec![subscription("a", REMOVED, 0, "u1")],
                vec![subscription("b", REMOVED, 0, "u2")],
                vec![subscription("c", REMOVED, 0, "u3")],
            ],
        )
    }

    async fn drain(pager: &mut SubscriptionPager) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(page) = pager.next_page().await {
            ids.extend(page.items.into_iter().map(|s| s.id));
        }
        ids
    }

    #[tokio::test]
    async fn walks_every_page_until_cursor_runs_out() {
        let registry = Arc::new(three_pages());
        let mut pager = SubscriptionPager::new(registry.clone(), Some(REMOVED), false);

        assert_eq!(drain(&mut pager).await, vec!["a", "b", "c"]);
        assert_eq!(pager.pages_fetched(), 3);

        let calls = registry.list_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                (Some(REMOVED), None),
                (Some(REMOVED), Some("1".to_string())),
                (Some(REMOVED), Some("2".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn single_page_mode_stops_after_first_page() {
        let registry = Arc::new(three_pages());
        let mut pager = SubscriptionPager::new(registry.clone(), Some(REMOVED), true);

        assert_eq!(drain(&mut pager).await, vec!["a"]);
        assert_eq!(registry.list_call_count(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_ends_enumeration_quietly() {
        let registry =
            Arc::new(three_pages().failing_list(Some(REMOVED), 1, StatusCode::INTERNAL_SERVER_ERROR));
        let mut pager = SubscriptionPager::new(registry.clone(), Some(REMOVED), false);

        assert_eq!(drain(&mut pager).await, vec!["a"]);
        assert_eq!(registry.list_call_count(), 2);
        // Exhausted pagers never call out again
        assert!(pager.next_page().await.is_none());
        assert_eq!(registry.list_call_count(), 2);
    }

    #[tokio::test]
    async fn empty_registry_yields_one_empty_page() {
        let registry = Arc::new(FakeRegistry::new());
        let mut pager = SubscriptionPager::new(registry, None, false);

        let page = pager.next_page().await.expect("first page");
        assert!(page.items.is_empty());
        assert!(pager.next_page().await.is_none());
    }
}
