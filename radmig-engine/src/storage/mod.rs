//! Destination-side collaborators consumed by the engine
//!
//! - [`BlobStore`]: media bytes by storage key
//! - [`DomainStore`]: stations, media and library entities

pub mod blob_store;
pub mod domain_store;

pub use blob_store::{BlobStore, FsBlobStore};
pub use domain_store::{
    DomainStore, EntityKind, ImportProvenance, NewEntity, NewMediaItem, NewStation, StoredMedia,
};
