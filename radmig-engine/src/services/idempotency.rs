//! Cross-run idempotency for staged commits
//!
//! An entity counts as already imported when the destination holds one of the same
//! kind, for the same (station, source type) pair, whose recorded source ID is the
//! scoped identifier or, for rows written before scoping, its bare raw form. Other
//! stations and other source types never match.

use radmig_common::Result;
use std::sync::Arc;

use crate::models::ScopedSourceId;
use crate::storage::{DomainStore, EntityKind};

#[derive(Clone)]
pub struct IdempotencyResolver {
    store: Arc<dyn DomainStore>,
    source_type: String,
}

impl IdempotencyResolver {
    pub fn new(store: Arc<dyn DomainStore>, source_type: impl Into<String>) -> Self {
        Self {
            store,
            source_type: source_type.into(),
        }
    }

    /// Destination ID of a previously imported entity, if any
    ///
    /// `station_id` is the destination station; `None` for stations and users.
    pub async fn find_existing(
        &self,
        kind: EntityKind,
        station_id: Option<&str>,
        source_id: &ScopedSourceId,
    ) -> Result<Option<String>> {
        let candidates = source_id.lookup_candidates();
        let found = self
            .store
            .find_imported(kind, station_id, &self.source_type, &candidates)
            .await?;

        if let Some(existing) = &found {
            tracing::debug!(
                kind = %kind,
                source_id = %source_id,
                existing_id = %existing,
                "Entity already imported"
            );
        }
        Ok(found)
    }
}
