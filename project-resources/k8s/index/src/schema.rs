//! Tracks the resource kinds served by the cluster.
//!
//! Discovery is expensive, so the cache is refreshed only when resource
//! definitions change. Notifications arriving in a burst, e.g. while a chart
//! installs many CRDs, are collapsed into a single refresh.

use futures::prelude::*;
use parking_lot::RwLock;
use project_resources_core::{
    discovery::DiscoverResources,
    resource::{ResourceDescriptor, Snapshot},
    Gvr, Result,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::Notify, time};
use tracing::{debug, info, warn};

/// How long to wait after a notification before refreshing.
pub const DEBOUNCE: time::Duration = time::Duration::from_millis(500);

/// How long to wait before retrying a failed refresh.
pub const RETRY: time::Duration = time::Duration::from_secs(30);

#[derive(Debug)]
pub struct SchemaCache {
    snapshot: RwLock<Arc<Snapshot>>,
    pending: AtomicBool,
    notify: Notify,
    metrics: SchemaMetrics,
}

pub type SharedSchema = Arc<SchemaCache>;

#[derive(Clone, Debug, Default)]
pub struct SchemaMetrics {
    refreshes: Family<RefreshLabels, Counter>,
    resources: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RefreshLabels {
    result: &'static str,
}

// === impl SchemaCache ===

impl SchemaCache {
    pub fn shared(metrics: SchemaMetrics) -> SharedSchema {
        Arc::new(Self {
            snapshot: Default::default(),
            pending: AtomicBool::new(false),
            notify: Notify::new(),
            metrics,
        })
    }

    /// Returns the most recently committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn list(&self) -> Vec<ResourceDescriptor> {
        self.snapshot().list().to_vec()
    }

    pub fn get(&self, resource: &str, group: &str) -> Option<ResourceDescriptor> {
        self.snapshot().get(resource, group).cloned()
    }

    pub fn kind_for(&self, gvr: &Gvr) -> Result<String> {
        self.snapshot().kind_for(gvr)
    }

    pub fn gvr_from_path(&self, segment: &str) -> Result<Gvr> {
        self.snapshot().gvr_from_path(segment)
    }

    /// Commits a new snapshot for subsequent readers.
    pub fn replace(&self, snapshot: Snapshot) {
        self.metrics.refreshed(&snapshot);
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Schedules a refresh.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Calls [`SchemaCache::notify`] for each item of `events`.
    pub async fn notify_on<S>(self: Arc<Self>, events: S)
    where
        S: Stream,
    {
        tokio::pin!(events);
        while events.next().await.is_some() {
            self.notify();
        }
    }

    /// Refreshes the cache from `discovery` whenever notified.
    pub async fn run<D: DiscoverResources>(self: Arc<Self>, discovery: D) {
        loop {
            self.notify.notified().await;
            time::sleep(DEBOUNCE).await;

            // A refresh triggered by an earlier notification may have already
            // picked up this change.
            if !self.pending.swap(false, Ordering::AcqRel) {
                debug!("Skipping refresh");
                continue;
            }

            match discovery.discover().await {
                Ok(resources) => {
                    let snapshot = Snapshot::new(resources);
                    info!(resources = snapshot.len(), "Refreshed resources");
                    self.replace(snapshot);
                }
                Err(error) => {
                    warn!(%error, retry = ?RETRY, "Failed to discover resources");
                    self.metrics.failed();
                    self.pending.store(true, Ordering::Release);
                    time::sleep(RETRY).await;
                    self.notify.notify_one();
                }
            }
        }
    }
}

// === impl SchemaMetrics ===

impl SchemaMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        reg.register(
            "refreshes",
            "Count of resource discovery refreshes",
            metrics.refreshes.clone(),
        );
        reg.register(
            "resources",
            "Number of resources served by the aggregated API",
            metrics.resources.clone(),
        );
        metrics
    }

    fn refreshed(&self, snapshot: &Snapshot) {
        self.refreshes
            .get_or_create(&RefreshLabels { result: "ok" })
            .inc();
        self.resources.set(snapshot.len() as i64);
    }

    fn failed(&self) {
        self.refreshes
            .get_or_create(&RefreshLabels { result: "error" })
            .inc();
    }
}
