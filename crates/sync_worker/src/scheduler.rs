use crate::connectivity::ConnectivityMonitor;
use crate::domain::{SyncPassReport, SyncService};
use common::domain::DomainResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Per-outlet pass state: the lock makes passes for one outlet mutually
/// exclusive, the pending flag coalesces triggers that arrive while a pass
/// is already running (at most one extra pass gets queued, never a stack).
#[derive(Default)]
struct OutletSlot {
    pass_lock: Mutex<()>,
    pending: AtomicBool,
}

/// Dispatches sync passes per outlet.
///
/// Guarantees:
/// - at most one pass runs for an outlet at any time (entries are processed
///   in `queued_at` order, two concurrent passes could reorder or
///   double-process);
/// - passes for different outlets run independently;
/// - triggers are coalesced per outlet;
/// - nothing runs while the connectivity monitor reports offline.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    service: Arc<SyncService>,
    monitor: ConnectivityMonitor,
    slots: Mutex<HashMap<String, Arc<OutletSlot>>>,
    cancel: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        service: Arc<SyncService>,
        monitor: ConnectivityMonitor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                service,
                monitor,
                slots: Mutex::new(HashMap::new()),
                cancel,
            }),
        }
    }

    /// Request a sync pass for one outlet. Fire-and-forget: the pass runs on
    /// a background task. Connectivity-gated; requests while offline are
    /// dropped (recovery fan-out will pick the outlet back up).
    pub async fn request_sync(&self, outlet_id: &str) {
        if !self.inner.monitor.is_online() {
            debug!(outlet_id = %outlet_id, "Sync requested while offline, skipping");
            return;
        }
        if self.inner.cancel.is_cancelled() {
            return;
        }

        let slot = self.slot(outlet_id).await;
        if slot.pending.swap(true, Ordering::SeqCst) {
            // A pass for this outlet is already queued behind the running
            // one; coalesce
            debug!(outlet_id = %outlet_id, "Sync request coalesced");
            return;
        }

        let inner = self.inner.clone();
        let outlet_id = outlet_id.to_string();
        tokio::spawn(async move {
            SchedulerInner::drain_outlet(inner, outlet_id, slot).await;
        });
    }

    /// Run a pass inline and wait for it, honoring the same per-outlet
    /// exclusion and connectivity gating as the background path. Used by
    /// the manual "sync now" surface when the caller wants the pass
    /// report. While offline the pass is refused with an empty report, so
    /// a manual trigger cannot burn attempt counters against a dead
    /// network.
    pub async fn sync_now(&self, outlet_id: &str) -> DomainResult<SyncPassReport> {
        if !self.inner.monitor.is_online() {
            debug!(outlet_id = %outlet_id, "Manual sync requested while offline, skipping");
            return Ok(SyncPassReport::default());
        }

        let slot = self.slot(outlet_id).await;
        let _guard = slot.pass_lock.lock().await;
        self.inner
            .service
            .run_pass(outlet_id, &self.inner.cancel)
            .await
    }

    async fn slot(&self, outlet_id: &str) -> Arc<OutletSlot> {
        let mut slots = self.inner.slots.lock().await;
        slots
            .entry(outlet_id.to_string())
            .or_insert_with(|| Arc::new(OutletSlot::default()))
            .clone()
    }
}

impl SchedulerInner {
    async fn drain_outlet(inner: Arc<SchedulerInner>, outlet_id: String, slot: Arc<OutletSlot>) {
        let _guard = slot.pass_lock.lock().await;

        // Consume coalesced requests until none arrived during the last pass
        while slot.pending.swap(false, Ordering::SeqCst) {
            if inner.cancel.is_cancelled() || !inner.monitor.is_online() {
                break;
            }
            if let Err(e) = inner.service.run_pass(&outlet_id, &inner.cancel).await {
                // Queue-store failures are the only thing that aborts a
                // pass; surface them loudly and leave the entries queued
                error!(outlet_id = %outlet_id, error = %e, "Sync pass aborted");
            }
        }
    }
}
