use crate::domain::{CanonicalPourEvent, DomainError, DomainResult, PourEventLedger};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::{debug, info};

/// Durable ledger backed by the backend's pour_events table.
///
/// Inserts dedupe on `idempotency_key`: the sync engine delivers
/// at-least-once (a crash between the ledger write and the queue's
/// mark-synced re-submits the same event), and the conflict clause absorbs
/// the duplicate without error.
#[derive(Clone)]
pub struct PostgresPourEventLedger {
    client: PostgresClient,
}

impl PostgresPourEventLedger {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PourEventLedger for PostgresPourEventLedger {
    async fn record_event(&self, event: &CanonicalPourEvent) -> DomainResult<()> {
        debug!(
            outlet_id = %event.outlet_id,
            device_id = %event.device_id,
            idempotency_key = %event.idempotency_key,
            "Recording pour event in ledger"
        );

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(|e| DomainError::LedgerUnavailable(e.to_string()))?;

        let result = conn
            .execute(
                "INSERT INTO pour_events (event_id, outlet_id, device_id, pairing_id, bottle_id,
                     sku_id, poured_ml, pulse_count, started_at, battery, synced_from_offline,
                     error_flag, idempotency_key)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (idempotency_key) DO NOTHING",
                &[
                    &event.event_id,
                    &event.outlet_id,
                    &event.device_id,
                    &event.pairing_id,
                    &event.bottle_id,
                    &event.sku_id,
                    &event.poured_ml,
                    &event.pulse_count,
                    &event.started_at,
                    &event.battery,
                    &event.synced_from_offline,
                    &event.error_flag,
                    &event.idempotency_key,
                ],
            )
            .await;

        match result {
            Ok(0) => {
                // Conflict path: the event was already recorded by an
                // earlier attempt that crashed before mark-synced
                info!(idempotency_key = %event.idempotency_key, "Pour event already in ledger, deduplicated");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(db_err) = e.as_db_error() {
                    // Class 23: integrity constraint violations are
                    // rejections, retrying the same payload cannot succeed
                    if db_err.code().code().starts_with("23") {
                        return Err(DomainError::LedgerRejected(db_err.message().to_string()));
                    }
                }
                Err(DomainError::LedgerUnavailable(e.to_string()))
            }
        }
    }
}
