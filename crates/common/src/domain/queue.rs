use crate::domain::reading::{EnqueuePourInput, QueuedEntry};
use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Aggregate queue counts for the operator surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    /// Entries never yet attempted
    pub pending: u64,
    /// Entries with at least one failed attempt, still retried
    pub failed: u64,
    /// Terminal entries awaiting purge
    pub synced: u64,
    /// Failed entries at the attempt ceiling, skipped until an operator
    /// discards them
    pub needs_review: u64,
    pub total: u64,
}

/// Local, per-outlet store of queued pour readings.
///
/// This is the only mutable shared resource in the core. Implementations
/// serialize writes per store and surface every persistence failure as
/// `DomainError::QueuePersistence` -- silently losing a pour reading is the
/// one unacceptable outcome of this subsystem. None of these operations may
/// touch the network.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PourQueueStore: Send + Sync {
    /// Append a new pending entry with `queued_at = now()`. Validates the
    /// input and never blocks on anything but local persistence.
    async fn enqueue(&self, input: EnqueuePourInput) -> DomainResult<QueuedEntry>;

    /// All entries with `synced_at = null` for the outlet, ascending by
    /// `queued_at`. The order is significant: later readings for the same
    /// device must not be applied before earlier ones.
    async fn list_unsynced(&self, outlet_id: &str) -> DomainResult<Vec<QueuedEntry>>;

    /// Mark an entry terminally synced. Idempotent: re-marking a synced
    /// entry is a no-op, not an error.
    async fn mark_synced(&self, entry_id: &str) -> DomainResult<()>;

    /// Record a failed attempt: increments `sync_attempts`, stores the
    /// reason and the attempt timestamp, leaves `synced_at` null. A synced
    /// entry is left untouched (terminality wins over bookkeeping).
    async fn mark_failed(&self, entry_id: &str, error: &str) -> DomainResult<QueuedEntry>;

    /// Bulk-delete the outlet's synced entries; pending and failed entries
    /// are never touched. Returns how many were removed.
    async fn purge_synced(&self, outlet_id: &str) -> DomainResult<u64>;

    /// Permanently delete one failed entry (operator override for permanent
    /// conditions, e.g. a decommissioned device). Refuses pending and
    /// synced entries with `QueueEntryNotFailed`.
    async fn discard_failed(&self, entry_id: &str) -> DomainResult<()>;

    /// Every entry for the outlet, ascending by `queued_at`, for display
    async fn list_entries(&self, outlet_id: &str) -> DomainResult<Vec<QueuedEntry>>;

    /// Outlets that currently hold unsynced entries, used to fan sync
    /// requests out on connectivity recovery
    async fn outlets_with_unsynced(&self) -> DomainResult<Vec<String>>;
}
