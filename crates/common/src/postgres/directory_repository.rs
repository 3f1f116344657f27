use crate::domain::{Device, DirectoryRepository, DomainError, DomainResult, PairingWithBottle};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Device row for PostgreSQL storage with timestamp metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub device_id: String,
    pub outlet_id: String,
    pub device_code: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Convert database DeviceRow to domain Device
impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Device {
            device_id: row.device_id,
            outlet_id: row.outlet_id,
            device_code: row.device_code,
            name: row.device_name, // Map device_name -> name
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}

/// Active pairing joined with its bottle, as returned by the pairing query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingWithBottleRow {
    pub pairing_id: String,
    pub device_id: String,
    pub bottle_id: String,
    pub sku_id: String,
    pub activated_at: DateTime<Utc>,
}

impl From<PairingWithBottleRow> for PairingWithBottle {
    fn from(row: PairingWithBottleRow) -> Self {
        PairingWithBottle {
            pairing_id: row.pairing_id,
            device_id: row.device_id,
            bottle_id: row.bottle_id,
            sku_id: row.sku_id,
            activated_at: row.activated_at,
        }
    }
}

/// Read-through directory lookups against the backend's device and pairing
/// tables. No caching: every call sees the directory as it is right now,
/// which is what lets queued entries resolve against a pairing that changed
/// after enqueue.
#[derive(Clone)]
pub struct PostgresDirectoryRepository {
    client: PostgresClient,
}

impl PostgresDirectoryRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DirectoryRepository for PostgresDirectoryRepository {
    async fn get_device_by_code(
        &self,
        outlet_id: &str,
        device_code: &str,
    ) -> DomainResult<Option<Device>> {
        debug!(outlet_id = %outlet_id, device_code = %device_code, "Resolving device from directory");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT device_id, outlet_id, device_code, device_name, created_at, updated_at
                 FROM devices
                 WHERE outlet_id = $1 AND device_code = $2 AND deleted_at IS NULL",
                &[&outlet_id, &device_code],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let device = row.map(|row| {
            let device_row = DeviceRow {
                device_id: row.get(0),
                outlet_id: row.get(1),
                device_code: row.get(2),
                device_name: row.get(3),
                created_at: row.get(4),
                updated_at: row.get(5),
            };
            device_row.into()
        });

        Ok(device)
    }

    async fn get_active_pairing(
        &self,
        device_id: &str,
    ) -> DomainResult<Option<PairingWithBottle>> {
        debug!(device_id = %device_id, "Resolving active pairing from directory");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT p.pairing_id, p.device_id, p.bottle_id, b.sku_id, p.activated_at
                 FROM pairings p
                 JOIN bottles b ON b.bottle_id = p.bottle_id
                 WHERE p.device_id = $1 AND p.deactivated_at IS NULL",
                &[&device_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let pairing = row.map(|row| {
            let pairing_row = PairingWithBottleRow {
                pairing_id: row.get(0),
                device_id: row.get(1),
                bottle_id: row.get(2),
                sku_id: row.get(3),
                activated_at: row.get(4),
            };
            pairing_row.into()
        });

        Ok(pairing)
    }
}
