use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Registered smart-pourer device. Belongs to exactly one outlet and is
/// addressed by its external `device_code`.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub outlet_id: String,
    pub device_code: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Joined directory record for a device's active pairing: the pairing row
/// plus the bottle it points at and that bottle's SKU. At most one active
/// pairing exists per device at any instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingWithBottle {
    pub pairing_id: String,
    pub device_id: String,
    pub bottle_id: String,
    pub sku_id: String,
    pub activated_at: DateTime<Utc>,
}

/// Read-through access to the external device/pairing directory.
///
/// Implementations must not cache across sync passes: a device can be
/// repaired or reassigned while events sit in the queue, and resolution has
/// to see whatever is active at sync time. Not-found is a normal outcome
/// (the device may have been deleted after the reading was queued), never a
/// transport error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    /// Resolve a device by its external code within one outlet
    async fn get_device_by_code(
        &self,
        outlet_id: &str,
        device_code: &str,
    ) -> DomainResult<Option<Device>>;

    /// Resolve the device's currently active pairing, if any
    async fn get_active_pairing(&self, device_id: &str)
        -> DomainResult<Option<PairingWithBottle>>;
}
