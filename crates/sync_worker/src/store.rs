mod file_queue_store;

pub use file_queue_store::*;
