use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::{join, join_all};
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::services::deleter::SubscriptionDeleter;
use crate::services::helix::{SubscriptionApi, SubscriptionPage, SubscriptionStatus};
use crate::services::pager::SubscriptionPager;
use crate::services::refresh::RefreshFlagBatcher;

/// What a sweep found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Subscriptions selected for deletion.
    pub found: usize,
    pub deleted: Vec<String>,
    /// Subscription id and the reason its deletion failed.
    pub failed: Vec<(String, String)>,
    /// Distinct accounts handed to the refresh batcher.
    pub accounts_flagged: usize,
}

impl SweepReport {
    fn record(&mut self, results: Vec<(String, AppResult<()>)>) {
        for (id, result) in results {
            match result {
                Ok(()) => self.deleted.push(id),
                Err(e) => self.failed.push((id, e.to_string())),
            }
        }
    }
}

/// Registry totals as advertised on the first page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCount {
    /// Items on the first page.
    pub items: usize,
    pub total: u64,
    pub total_cost: u64,
    pub max_total_cost: u64,
}

pub struct ReconciliationJob {
    api: Arc<dyn SubscriptionApi>,
    deleter: Arc<SubscriptionDeleter>,
    refresh: RefreshFlagBatcher,
}

impl ReconciliationJob {
    pub fn new(
        api: Arc<dyn SubscriptionApi>,
        deleter: Arc<SubscriptionDeleter>,
        refresh: RefreshFlagBatcher,
    ) -> Self {
        Self {
            api,
            deleter,
            refresh,
        }
    }

    /// Delete every subscription in `statuses`, one status at a time.
    ///
    /// Each page's deletions and refresh registrations run concurrently and are
    /// all awaited before the next page is fetched. When `flag_accounts` is set
    /// the owner of each deleted subscription is queued for a credential
    /// refresh, once per status.
    pub async fn sweep_statuses(
        &self,
        statuses: &[SubscriptionStatus],
        flag_accounts: bool,
        single_loop: bool,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut attempted: HashSet<String> = HashSet::new();

        for &status in statuses {
            info!("Sweeping EventSub subscriptions with status {}", status);

            let mut pager = SubscriptionPager::new(self.api.clone(), Some(status), single_loop);
            let mut owners_seen: HashSet<String> = HashSet::new();
            let before = report.found;

            while let Some(page) = pager.next_page().await {
                self.process_status_page(
                    page,
                    flag_accounts.then_some(&mut owners_seen),
                    &mut attempted,
                    &mut report,
                )
                .await;
            }

            info!(
                "Status {}: {} subscription(s) found over {} page(s)",
                status,
                report.found - before,
                pager.pages_fetched()
            );
        }

        info!(
            "Status sweep finished: {} found, {} deleted, {} failed, {} account(s) flagged ({} delete calls so far)",
            report.found,
            report.deleted.len(),
            report.failed.len(),
            report.accounts_flagged,
            self.deleter.request_count()
        );

        report
    }

    async fn process_status_page(
        &self,
        page: SubscriptionPage,
        owners_seen: Option<&mut HashSet<String>>,
        attempted: &mut HashSet<String>,
        report: &mut SweepReport,
    ) {
        let targets: Vec<_> = page
            .items
            .into_iter()
            .filter(|sub| attempted.insert(sub.id.clone()))
            .collect();
        report.found += targets.len();

        let owners: Vec<String> = match owners_seen {
            Some(seen) => targets
                .iter()
                .filter_map(|sub| match sub.condition.owner_id() {
                    Some(owner) => Some(owner.to_string()),
                    None => {
                        debug!("EventSub {} has no owning account", sub.id);
                        None
                    }
                })
                .filter(|owner| seen.insert(owner.clone()))
                .collect(),
            None => Vec::new(),
        };

        let deletions = join_all(targets.iter().map(|sub| self.delete_one(sub.id.clone())));
        let registrations = join_all(
            owners
                .iter()
                .map(|owner| self.refresh.mark_account_dirty(owner)),
        );
        let (results, _) = join(deletions, registrations).await;

        report.accounts_flagged += owners.len();
        report.record(results);
    }

    /// Delete every subscription that carries a positive cost.
    ///
    /// The whole registry is enumerated first. Owners are then queued for a
    /// refresh as one batch, and only after that batch is queued are the
    /// deletions issued as a second batch.
    pub async fn sweep_costly(&self, single_loop: bool) -> SweepReport {
        let mut report = SweepReport::default();
        let mut pager = SubscriptionPager::new(self.api.clone(), None, single_loop);

        let mut by_owner: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut ownerless: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(page) = pager.next_page().await {
            for sub in page.items {
                if sub.cost == 0 || !seen.insert(sub.id.clone()) {
                    continue;
                }
                report.found += 1;
                match sub.condition.owner_id() {
                    Some(owner) => by_owner.entry(owner.to_string()).or_default().push(sub.id),
                    None => ownerless.push(sub.id),
                }
            }
        }

        info!(
            "Found {} costly EventSub subscription(s) across {} account(s)",
            report.found,
            by_owner.len()
        );

        join_all(by_owner.keys().map(|owner| self.refresh.mark_account_dirty(owner))).await;
        report.accounts_flagged = by_owner.len();

        let ids = by_owner.into_values().flatten().chain(ownerless);
        let results = join_all(ids.map(|id| self.delete_one(id))).await;
        report.record(results);

        info!(
            "Cost sweep finished: {} deleted, {} failed",
            report.deleted.len(),
            report.failed.len()
        );

        report
    }

    /// Report registry totals from a single page. Read-only.
    pub async fn count(&self, status: Option<SubscriptionStatus>) -> Option<SubscriptionCount> {
        let mut pager = SubscriptionPager::new(self.api.clone(), status, true);
        let Some(page) = pager.next_page().await else {
            warn!("Could not count EventSub subscriptions; listing failed");
            return None;
        };

        let count = SubscriptionCount {
            items: page.items.len(),
            total: page.total,
            total_cost: page.total_cost,
            max_total_cost: page.max_total_cost,
        };

        info!(
            "EventSub registry: {} on first page, total={}, total_cost={}/{}",
            count.items, count.total, count.total_cost, count.max_total_cost
        );

        Some(count)
    }

    async fn delete_one(&self, id: String) -> (String, AppResult<()>) {
        let result = self.deleter.delete(&id).await;
        if let Err(ref e) = result {
            warn!("EventSub {} was not deleted: {}", id, e);
        }
        (id, result)
    }
}
