mod client;
mod config;
mod directory_repository;
mod ledger_repository;

pub use client::*;
pub use config::*;
pub use directory_repository::*;
pub use ledger_repository::*;
