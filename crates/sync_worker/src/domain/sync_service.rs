use chrono::{DateTime, Utc};
use common::domain::{
    CanonicalPourEvent, DirectoryRepository, DomainError, DomainResult, PourEventLedger,
    PourQueueStore, QueuedEntry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Retry policy for failed queue entries.
///
/// Without it a permanently unresolvable entry (say, a deleted device) would
/// be re-attempted on every pass forever. Backoff grows per entry from its
/// own attempt counter; the ceiling parks the entry for operator review
/// instead of retrying it at all.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Attempts after which an entry is skipped and surfaced as
    /// needs-review; only an operator discard removes it
    pub max_sync_attempts: u32,
    /// First retry delay; doubles each failed attempt
    pub backoff_base: Duration,
    /// Upper bound on the per-entry retry delay
    pub backoff_cap: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_sync_attempts: 10,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(3600),
        }
    }
}

impl SyncPolicy {
    /// Delay before the next attempt for an entry that has failed
    /// `attempts` times: `base * 2^(attempts-1)`, capped
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exp = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_cap)
    }

    /// Entry is parked at the attempt ceiling
    pub fn needs_review(&self, entry: &QueuedEntry) -> bool {
        entry.synced_at.is_none() && entry.sync_attempts >= self.max_sync_attempts
    }

    fn in_backoff(&self, entry: &QueuedEntry, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = entry.last_attempt_at else {
            return false;
        };
        let delay = self.backoff_for(entry.sync_attempts);
        match chrono::Duration::from_std(delay) {
            Ok(delay) => last_attempt + delay > now,
            Err(_) => false,
        }
    }
}

/// Aggregate counts for one sync pass. Informational only; correctness
/// lives in the per-entry transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassReport {
    pub attempted: u64,
    pub synced: u64,
    pub failed: u64,
    pub skipped_backoff: u64,
    pub skipped_review: u64,
}

/// The sync engine: drains an outlet's unsynced queue entries against the
/// live directory and writes canonical pour events to the durable ledger.
///
/// Flow per entry, oldest first:
/// 1. Resolve the device by `reading.device_code`
/// 2. Resolve the device's active pairing (at sync time, not enqueue time)
/// 3. Build the canonical event (offline flag set, deterministic
///    idempotency key)
/// 4. Write it to the ledger
/// 5. Mark the entry synced
///
/// Every failure is contained to its entry: the entry is marked failed with
/// the reason and the pass moves on. Only a queue-store error aborts the
/// pass, since that risks losing bookkeeping.
pub struct SyncService {
    queue: Arc<dyn PourQueueStore>,
    directory: Arc<dyn DirectoryRepository>,
    ledger: Arc<dyn PourEventLedger>,
    policy: SyncPolicy,
}

impl SyncService {
    pub fn new(
        queue: Arc<dyn PourQueueStore>,
        directory: Arc<dyn DirectoryRepository>,
        ledger: Arc<dyn PourEventLedger>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            queue,
            directory,
            ledger,
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Run one sync pass over the outlet's queue.
    ///
    /// Entries are processed strictly in `queued_at` order and never
    /// concurrently within one outlet; the caller (scheduler) guarantees no
    /// second pass runs for the same outlet at the same time. Cancellation
    /// is honored between entries; each entry's transition commits
    /// individually, so a cancelled pass leaves the queue valid.
    #[instrument(skip_all, fields(outlet_id = %outlet_id))]
    pub async fn run_pass(
        &self,
        outlet_id: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<SyncPassReport> {
        let entries = self.queue.list_unsynced(outlet_id).await?;
        let mut report = SyncPassReport::default();

        debug!(unsynced = entries.len(), "Starting sync pass");

        for entry in &entries {
            if cancel.is_cancelled() {
                info!(
                    attempted = report.attempted,
                    "Sync pass cancelled between entries"
                );
                break;
            }

            if self.policy.needs_review(entry) {
                report.skipped_review += 1;
                debug!(
                    entry_id = %entry.entry_id,
                    attempts = entry.sync_attempts,
                    "Entry at attempt ceiling, waiting for operator review"
                );
                continue;
            }

            if self.policy.in_backoff(entry, Utc::now()) {
                report.skipped_backoff += 1;
                continue;
            }

            report.attempted += 1;
            match self.sync_entry(entry).await {
                Ok(()) => report.synced += 1,
                Err(reason) => {
                    warn!(
                        entry_id = %entry.entry_id,
                        device_code = %entry.reading.device_code,
                        %reason,
                        "Queue entry failed to sync"
                    );
                    self.queue
                        .mark_failed(&entry.entry_id, &reason.to_string())
                        .await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            skipped_backoff = report.skipped_backoff,
            skipped_review = report.skipped_review,
            "Sync pass complete"
        );

        Ok(report)
    }

    /// Resolve and apply a single entry. The directory is consulted at this
    /// moment, so a device repaired while the entry sat in the queue
    /// resolves to its current bottle, not the one paired at enqueue time.
    async fn sync_entry(&self, entry: &QueuedEntry) -> DomainResult<()> {
        let device = self
            .directory
            .get_device_by_code(&entry.outlet_id, &entry.reading.device_code)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(entry.reading.device_code.clone()))?;

        let pairing = self
            .directory
            .get_active_pairing(&device.device_id)
            .await?
            .ok_or_else(|| DomainError::NoActivePairing(device.device_id.clone()))?;

        let event = CanonicalPourEvent::from_resolved(entry, &device, &pairing);
        self.ledger.record_event(&event).await?;

        // Strictly after the ledger write: a crash in between leaves the
        // entry pending and the ledger deduplicates the re-submission
        self.queue.mark_synced(&entry.entry_id).await?;

        debug!(
            entry_id = %entry.entry_id,
            device_id = %device.device_id,
            bottle_id = %pairing.bottle_id,
            sku_id = %pairing.sku_id,
            "Queue entry synced to ledger"
        );

        Ok(())
    }
}
