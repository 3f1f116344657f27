use crate::domain::SyncPolicy;
use common::domain::{DomainResult, PourQueueStore, QueueStatus, QueuedEntry, SyncState};
use std::sync::Arc;
use tracing::info;

/// Read-only views over queue contents plus the two operator actions.
///
/// The inspector never mutates in-flight sync state: it only aggregates for
/// display, bulk-deletes terminal entries, and deletes individual failed
/// entries on explicit operator request.
pub struct QueueInspector {
    store: Arc<dyn PourQueueStore>,
    policy: SyncPolicy,
}

impl QueueInspector {
    pub fn new(store: Arc<dyn PourQueueStore>, policy: SyncPolicy) -> Self {
        Self { store, policy }
    }

    /// Aggregate counts for one outlet. Computed from a point-in-time read;
    /// eventually-consistent with respect to a running pass, which is fine
    /// for a status surface.
    pub async fn status(&self, outlet_id: &str) -> DomainResult<QueueStatus> {
        let entries = self.store.list_entries(outlet_id).await?;

        let mut status = QueueStatus::default();
        for entry in &entries {
            status.total += 1;
            match entry.state() {
                SyncState::Pending => status.pending += 1,
                SyncState::Synced => status.synced += 1,
                SyncState::Failed => {
                    status.failed += 1;
                    if self.policy.needs_review(entry) {
                        status.needs_review += 1;
                    }
                }
            }
        }

        Ok(status)
    }

    /// Per-entry details (error strings, timestamps, attempt counts) for
    /// the operator UI, ascending by `queued_at`
    pub async fn entries(&self, outlet_id: &str) -> DomainResult<Vec<QueuedEntry>> {
        self.store.list_entries(outlet_id).await
    }

    /// Bulk-delete the outlet's synced entries. Safe at any time: only
    /// terminal entries are touched.
    pub async fn purge_synced(&self, outlet_id: &str) -> DomainResult<u64> {
        let removed = self.store.purge_synced(outlet_id).await?;
        info!(outlet_id = %outlet_id, removed, "Operator purged synced entries");
        Ok(removed)
    }

    /// Permanently delete one failed entry that will never be retried
    /// again. Explicit operator override for permanent conditions, e.g. a
    /// decommissioned device.
    pub async fn discard_failed(&self, entry_id: &str) -> DomainResult<()> {
        self.store.discard_failed(entry_id).await
    }
}
