use crate::domain::directory::{Device, PairingWithBottle};
use crate::domain::reading::QueuedEntry;
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Canonical pour event written to the durable ledger on successful sync.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPourEvent {
    pub event_id: String,
    pub outlet_id: String,
    pub device_id: String,
    pub pairing_id: String,
    pub bottle_id: String,
    pub sku_id: String,
    pub poured_ml: f64,
    pub pulse_count: i64,
    pub started_at: DateTime<Utc>,
    pub battery: Option<i32>,
    /// Marks events that arrived through the offline queue
    pub synced_from_offline: bool,
    /// Always false for resolved events; entries that cannot resolve are
    /// never written, only marked failed in the queue
    pub error_flag: bool,
    /// Deterministic key the ledger dedupes on, so a crash between the
    /// ledger write and the queue's mark-synced can re-submit harmlessly
    pub idempotency_key: String,
}

impl CanonicalPourEvent {
    /// Build the event for a resolved queue entry. `started_at` falls back to
    /// the enqueue time when the reading carried no producer timestamp.
    pub fn from_resolved(
        entry: &QueuedEntry,
        device: &Device,
        pairing: &PairingWithBottle,
    ) -> Self {
        let started_at = entry.reading.started_at.unwrap_or(entry.queued_at);
        let idempotency_key = format!(
            "{}:{}:{}:{}",
            entry.outlet_id,
            entry.reading.device_code,
            started_at.timestamp_millis(),
            entry.reading.pulse_count,
        );

        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            outlet_id: entry.outlet_id.clone(),
            device_id: device.device_id.clone(),
            pairing_id: pairing.pairing_id.clone(),
            bottle_id: pairing.bottle_id.clone(),
            sku_id: pairing.sku_id.clone(),
            poured_ml: entry.reading.poured_ml,
            pulse_count: entry.reading.pulse_count,
            started_at,
            battery: entry.reading.battery,
            synced_from_offline: true,
            error_flag: false,
            idempotency_key,
        }
    }
}

/// Write access to the durable pour-event ledger.
///
/// The engine delivers at-least-once: implementations must absorb duplicate
/// submissions carrying the same `idempotency_key`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PourEventLedger: Send + Sync {
    /// Record one canonical pour event.
    ///
    /// # Returns
    /// () on success (including a deduplicated resubmission),
    /// `DomainError::LedgerRejected` when the ledger refuses the event,
    /// `DomainError::LedgerUnavailable` on transport failure
    async fn record_event(&self, event: &CanonicalPourEvent) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawPourReading;
    use chrono::TimeZone;

    fn entry(started_at: Option<DateTime<Utc>>) -> QueuedEntry {
        QueuedEntry {
            entry_id: "e-1".to_string(),
            outlet_id: "outlet-1".to_string(),
            reading: RawPourReading {
                device_code: "POUR-001".to_string(),
                poured_ml: 45.0,
                pulse_count: 312,
                started_at,
                battery: Some(90),
            },
            queued_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            sync_attempts: 0,
            sync_error: None,
            synced_at: None,
            last_attempt_at: None,
        }
    }

    fn device() -> Device {
        Device {
            device_id: "dev-1".to_string(),
            outlet_id: "outlet-1".to_string(),
            device_code: "POUR-001".to_string(),
            name: "Back bar pourer".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    fn pairing() -> PairingWithBottle {
        PairingWithBottle {
            pairing_id: "pair-1".to_string(),
            device_id: "dev-1".to_string(),
            bottle_id: "bottle-1".to_string(),
            sku_id: "sku-1".to_string(),
            activated_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_carries_pairing_resolution() {
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 11, 58, 30).unwrap();
        let event = CanonicalPourEvent::from_resolved(&entry(Some(started)), &device(), &pairing());

        assert_eq!(event.bottle_id, "bottle-1");
        assert_eq!(event.sku_id, "sku-1");
        assert_eq!(event.started_at, started);
        assert!(event.synced_from_offline);
        assert!(!event.error_flag);
    }

    #[test]
    fn test_started_at_falls_back_to_queued_at() {
        let e = entry(None);
        let event = CanonicalPourEvent::from_resolved(&e, &device(), &pairing());
        assert_eq!(event.started_at, e.queued_at);
    }

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let started = Utc.with_ymd_and_hms(2026, 3, 1, 11, 58, 30).unwrap();
        let a = CanonicalPourEvent::from_resolved(&entry(Some(started)), &device(), &pairing());
        let b = CanonicalPourEvent::from_resolved(&entry(Some(started)), &device(), &pairing());

        // Fresh event ids, same dedupe key
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_eq!(
            a.idempotency_key,
            format!("outlet-1:POUR-001:{}:312", started.timestamp_millis())
        );
    }
}
