use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogItem};
use crate::feed::{FeedSource, FetchError, LatestRelease, UNKNOWN_VERSION};
use crate::notifier::{NotificationEvent, Notifier};
use crate::store::SubscriptionStore;
use crate::tracker::VersionTracker;

/// What to do the first time an item is seen after startup, when no marker exists
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FirstObservation {
    /// Record the marker without notifying.
    #[default]
    Seed,
    /// Treat the first observation as a release and notify subscribers.
    Notify,
}

/// Summary of one pass over the catalog
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checked: usize,
    pub failed: usize,
    pub notified_items: Vec<String>,
    pub delivered: usize,
    pub unreachable: usize,
    pub transient: usize,
    pub cancelled: bool,
}

/// Polls every catalog item, detects version changes and drives the fan-out
pub struct Monitor {
    catalog: Arc<Catalog>,
    source: Arc<dyn FeedSource>,
    tracker: VersionTracker,
    store: SubscriptionStore,
    notifier: Notifier,
    first_observation: FirstObservation,
    running: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
}

impl Monitor {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn FeedSource>,
        tracker: VersionTracker,
        store: SubscriptionStore,
        notifier: Notifier,
        first_observation: FirstObservation,
    ) -> Self {
        Self {
            catalog,
            source,
            tracker,
            store,
            notifier,
            first_observation,
            running: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Wait until no cycle is running. After the token is cancelled, a
    /// running cycle returns once its current item is done.
    pub async fn wait_idle(&self) {
        let _guard = self.running.lock().await;
    }

    /// Run one cycle over the catalog, items in order.
    ///
    /// Returns `None` without doing anything if another cycle is still running.
    /// Cancellation is checked between items, never inside a fan-out.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Option<CycleReport> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous poll cycle still running, skipping this one");
            return None;
        };

        let mut report = CycleReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            checked: 0,
            failed: 0,
            notified_items: Vec::new(),
            delivered: 0,
            unreachable: 0,
            transient: 0,
            cancelled: false,
        };

        info!("Poll cycle started over {} items", self.catalog.len());

        for item in self.catalog.items() {
            if cancel.is_cancelled() {
                info!("Shutdown requested, stopping poll cycle early");
                report.cancelled = true;
                break;
            }
            report.checked += 1;

            let release = match self.source.fetch_latest(item).await {
                Ok(release) => release,
                Err(e) => {
                    log_fetch_error(item, &e);
                    report.failed += 1;
                    continue;
                }
            };

            let Some(event) = self.detect(item, release).await else {
                continue;
            };

            let recipients = match self.store.subscribers_of(&item.name).await {
                Ok(recipients) => recipients,
                Err(e) => {
                    // Marker stays uncommitted so the next cycle retries the fan-out
                    warn!(item = %item.name, "Failed to load subscribers: {:#}", e);
                    report.failed += 1;
                    continue;
                }
            };

            let delivery = self.notifier.notify(&event, &recipients).await;
            self.tracker.commit(&item.name, &event.new_version).await;

            report.notified_items.push(item.name.clone());
            report.delivered += delivery.delivered;
            report.unreachable += delivery.unreachable.len();
            report.transient += delivery.transient;
        }

        report.finished_at = Utc::now();
        let markers = self.tracker.len().await;
        info!(
            checked = report.checked,
            failed = report.failed,
            notified = report.notified_items.len(),
            delivered = report.delivered,
            unreachable = report.unreachable,
            markers,
            "Poll cycle finished in {}ms",
            (report.finished_at - report.started_at).num_milliseconds()
        );

        *self.last_report.write().await = Some(report.clone());
        Some(report)
    }

    /// Decide whether a fetched release is an update worth announcing.
    /// Seeds the marker silently on first observation under the `Seed` policy.
    async fn detect(&self, item: &CatalogItem, release: LatestRelease) -> Option<NotificationEvent> {
        if release.version == UNKNOWN_VERSION {
            info!(item = %item.name, title = %release.title, "No version in latest entry");
            return None;
        }

        if self.first_observation == FirstObservation::Seed
            && self.tracker.last_seen(&item.name).await.is_none()
        {
            info!(item = %item.name, version = %release.version, "First observation, seeding marker");
            self.tracker.commit(&item.name, &release.version).await;
            return None;
        }

        if !self.tracker.is_new_version(&item.name, &release.version).await {
            debug!(item = %item.name, version = %release.version, "No new version");
            return None;
        }

        info!(item = %item.name, version = %release.version, "New version detected");
        Some(NotificationEvent {
            item: item.clone(),
            new_version: release.version,
            title: release.title,
            link: release.link,
        })
    }
}

fn log_fetch_error(item: &CatalogItem, err: &FetchError) {
    match err {
        FetchError::Network(_) | FetchError::Status(_) => {
            warn!(item = %item.name, url = %item.feed_url, "Failed to fetch feed: {}", err)
        }
        FetchError::Parse(_) | FetchError::NoEntries | FetchError::PreRelease(_) => {
            info!(item = %item.name, "No usable entry: {}", err)
        }
    }
}
