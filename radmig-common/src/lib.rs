//! # radmig common library
//!
//! Shared plumbing for the migration engine and its binary:
//! - Error type and `Result` alias
//! - Event types (`MigrationEvent`) and the broadcast `EventBus`
//! - TOML configuration loading and root folder resolution
//! - SQLite pool initialisation
//! - Human-readable duration formatting for progress estimates

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod human_time;

pub use error::{Error, Result, ValidationError, ValidationErrors};
pub use events::{EventBus, MigrationEvent};
