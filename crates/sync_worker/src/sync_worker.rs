use crate::connectivity::ConnectivityMonitor;
use crate::domain::{SyncPolicy, SyncService};
use crate::inspector::QueueInspector;
use crate::scheduler::SyncScheduler;
use common::domain::{DirectoryRepository, PourEventLedger, PourQueueStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct SyncWorkerConfig {
    pub policy: SyncPolicy,
    /// How often outlets with unsynced entries are re-checked while online
    pub sync_interval: Duration,
}

/// Wires the offline queue core together: queue store, connectivity
/// monitor, sync engine, scheduler, and inspector.
///
/// The run loop reacts to two things: connectivity recoveries (fan a sync
/// request out to every outlet holding unsynced entries) and a periodic
/// tick (catch entries whose backoff window elapsed). Manual "sync now"
/// triggers go through the same scheduler, so per-outlet exclusion and
/// coalescing hold for all three.
pub struct SyncWorker {
    queue: Arc<dyn PourQueueStore>,
    monitor: ConnectivityMonitor,
    scheduler: SyncScheduler,
    inspector: QueueInspector,
    sync_interval: Duration,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<dyn PourQueueStore>,
        directory: Arc<dyn DirectoryRepository>,
        ledger: Arc<dyn PourEventLedger>,
        monitor: ConnectivityMonitor,
        config: SyncWorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        info!("Initializing pour sync worker");

        let service = Arc::new(SyncService::new(
            queue.clone(),
            directory,
            ledger,
            config.policy.clone(),
        ));
        let scheduler = SyncScheduler::new(service, monitor.clone(), cancel);
        let inspector = QueueInspector::new(queue.clone(), config.policy);

        Self {
            queue,
            monitor,
            scheduler,
            inspector,
            sync_interval: config.sync_interval,
        }
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn inspector(&self) -> &QueueInspector {
        &self.inspector
    }

    /// Manual trigger for one outlet, same path as the automatic ones
    pub async fn sync_now(&self, outlet_id: &str) {
        self.scheduler.request_sync(outlet_id).await;
    }

    /// Drive sync until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut connectivity = self.monitor.subscribe();
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Pour sync worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Pour sync worker stopping");
                    break;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        // Monitor dropped; nothing left to react to
                        break;
                    }
                    if *connectivity.borrow_and_update() {
                        debug!("Connectivity recovered, requesting sync for backlogged outlets");
                        self.sync_all().await;
                    }
                }
                _ = ticker.tick() => {
                    if self.monitor.is_online() {
                        self.sync_all().await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn sync_all(&self) {
        let outlets = match self.queue.outlets_with_unsynced().await {
            Ok(outlets) => outlets,
            Err(e) => {
                error!(error = %e, "Cannot list backlogged outlets");
                return;
            }
        };
        for outlet_id in outlets {
            self.scheduler.request_sync(&outlet_id).await;
        }
    }
}
