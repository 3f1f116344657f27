pub mod domain;
pub mod garde;
pub mod postgres;

pub use domain::*;
pub use postgres::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDirectoryRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPourEventLedger;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockPourQueueStore;
