pub mod connectivity;
pub mod domain;
pub mod inspector;
pub mod scheduler;
pub mod store;
pub mod sync_worker;

pub use connectivity::*;
pub use domain::*;
pub use inspector::*;
pub use scheduler::*;
pub use store::*;
pub use sync_worker::*;
