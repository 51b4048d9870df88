//! DiscoverySyncer: periodic re-discovery
//!
//! Runs in a background tokio task. The first cycle is run by startup code
//! before the listener comes up; this loop only handles the repeats.

use std::sync::Arc;
use tokio::time::{self, Duration};

use crate::config::SyncConfig;
use crate::sync::reconcile::Reconciler;

/// Background re-discovery service
pub struct DiscoverySyncer {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl DiscoverySyncer {
    /// `None` when periodic re-discovery is disabled (interval 0)
    pub fn new(reconciler: Arc<Reconciler>, config: &SyncConfig) -> Option<Self> {
        if config.interval_secs == 0 {
            return None;
        }
        Some(Self {
            reconciler,
            interval: Duration::from_secs(config.interval_secs),
        })
    }

    /// Start the background loop (runs forever)
    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            "[Discovery] Starting background discovery (interval: {}s)",
            self.interval.as_secs()
        );

        loop {
            time::sleep(self.interval).await;
            self.sync_once().await;
        }
    }

    async fn sync_once(&self) {
        match self.reconciler.run_cycle().await {
            Ok(report) => tracing::debug!("[Discovery] {:?}", report),
            Err(e) => tracing::warn!("[Discovery] Cycle aborted, registry unchanged: {}", e),
        }
    }
}
