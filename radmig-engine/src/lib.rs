//! radmig-engine library interface
//!
//! Migrates stations, media libraries, playlists, smart blocks, schedules,
//! webstreams and users from a legacy radio automation source into the destination
//! store, either directly or through a reviewable staged snapshot.

pub mod adapters;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use crate::adapters::{
    AdapterRegistry, EngineServices, ImportContext, SourceAdapter, StagedSourceAdapter,
};
pub use crate::config::EngineConfig;
pub use crate::services::MigrationService;
pub use radmig_common::{Error, Result};
