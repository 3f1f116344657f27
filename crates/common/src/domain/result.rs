use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no active pairing for device: {0}")]
    NoActivePairing(String),

    #[error("queue entry not found: {0}")]
    QueueEntryNotFound(String),

    #[error("queue entry {0} is not in a failed state")]
    QueueEntryNotFailed(String),

    #[error("queue persistence error: {0}")]
    QueuePersistence(String),

    #[error("pour event rejected by ledger: {0}")]
    LedgerRejected(String),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
