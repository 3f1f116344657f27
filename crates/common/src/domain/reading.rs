use chrono::{DateTime, Utc};
use ::garde::Validate;
use serde::{Deserialize, Serialize};

/// Raw pour reading as captured at the edge by a smart-pourer sensor.
///
/// Immutable once enqueued; owned by the [`QueuedEntry`] that wraps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPourReading {
    /// Opaque external device identifier, not a durable key
    pub device_code: String,
    /// Poured volume in millilitres, never negative
    pub poured_ml: f64,
    /// Raw flow-sensor pulse count for the pour
    pub pulse_count: i64,
    /// Producer-assigned timestamp of when the pour began, if known
    pub started_at: Option<DateTime<Utc>>,
    /// Battery level 0-100, absent when the sensor did not report it
    pub battery: Option<i32>,
}

/// Ingress input for enqueueing a pour reading, validated before storage
#[derive(Debug, Clone, Validate)]
pub struct EnqueuePourInput {
    #[garde(length(min = 1))]
    pub outlet_id: String,
    #[garde(length(min = 1))]
    pub device_code: String,
    #[garde(range(min = 0.0))]
    pub poured_ml: f64,
    #[garde(range(min = 0))]
    pub pulse_count: i64,
    #[garde(skip)]
    pub started_at: Option<DateTime<Utc>>,
    #[garde(inner(range(min = 0, max = 100)))]
    pub battery: Option<i32>,
}

impl EnqueuePourInput {
    pub fn into_reading(self) -> (String, RawPourReading) {
        let reading = RawPourReading {
            device_code: self.device_code,
            poured_ml: self.poured_ml,
            pulse_count: self.pulse_count,
            started_at: self.started_at,
            battery: self.battery,
        };
        (self.outlet_id, reading)
    }
}

/// Derived synchronization state of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never attempted, or awaiting the next pass
    Pending,
    /// At least one attempt failed; retried on later passes
    Failed,
    /// Terminal: the canonical event is in the ledger
    Synced,
}

/// A [`RawPourReading`] plus synchronization bookkeeping, scoped to one outlet.
///
/// Invariants:
/// - `synced_at` is set at most once and never cleared; an entry with
///   `synced_at` set is immutable.
/// - `sync_attempts` only grows, and persists across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEntry {
    pub entry_id: String,
    pub outlet_id: String,
    pub reading: RawPourReading,
    /// Enqueue timestamp, the total order used for draining
    pub queued_at: DateTime<Utc>,
    pub sync_attempts: u32,
    /// Last failure reason, for the operator surface
    pub sync_error: Option<String>,
    /// Terminal success marker
    pub synced_at: Option<DateTime<Utc>>,
    /// When the last sync attempt finished, used for per-entry backoff
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedEntry {
    pub fn state(&self) -> SyncState {
        if self.synced_at.is_some() {
            SyncState::Synced
        } else if self.sync_attempts > 0 {
            SyncState::Failed
        } else {
            SyncState::Pending
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}
