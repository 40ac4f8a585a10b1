//! Commit walk of a staged import
//!
//! Stations first, since every other entity needs a destination station, then
//! media through the ingestion pipeline, then the entities that reference media,
//! then users, then duration verification. Every selected item is checked against
//! the idempotency resolver, so committing the same snapshot twice creates nothing
//! the second time.

use radmig_common::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::duration_verifier::{verify_durations, DurationVerdict};
use super::idempotency::IdempotencyResolver;
use super::ingestion_pipeline::{IngestionPipeline, MediaTask};
use super::progress_reporter::ProgressReporter;
use crate::adapters::{ImportContext, MediaFetcher};
use crate::models::{
    ImportOutcome, Mapping, Phase, ScopedSourceId, StagedImport, StagedItem, StagedShowItem,
};
use crate::storage::{EntityKind, ImportProvenance, NewEntity, NewStation};

/// Outcome of the item-level idempotency check
enum Resolution {
    Existing(String),
    Create,
}

pub struct StagedCommitter<'a> {
    ctx: &'a ImportContext,
    fetcher: Arc<dyn MediaFetcher>,
    resolver: IdempotencyResolver,
    /// Source station ID → destination station ID
    stations: HashMap<String, String>,
    /// Scoped media source ID → destination media ID
    media: HashMap<String, String>,
    outcome: ImportOutcome,
}

impl<'a> StagedCommitter<'a> {
    pub fn new(ctx: &'a ImportContext, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            resolver: IdempotencyResolver::new(
                ctx.services.domain.clone(),
                ctx.source_type.as_str(),
            ),
            ctx,
            fetcher,
            stations: HashMap::new(),
            media: HashMap::new(),
            outcome: ImportOutcome::default(),
        }
    }

    /// Create every selected entity of `staged`
    ///
    /// Structural problems (target station missing, no station resolvable at all)
    /// fail before anything is created. Once something exists in the destination,
    /// errors and cancellation both return the partial outcome so the manifest of
    /// what was created survives for rollback.
    pub async fn commit(mut self, staged: &StagedImport) -> Result<ImportOutcome> {
        let started = Instant::now();
        let mut reporter = self.ctx.reporter();
        info!(
            job_id = %self.ctx.job_id,
            staged_import_id = %staged.id,
            selected = staged.selected_count(),
            "Committing staged import"
        );

        for (entity, total) in [
            ("stations", staged.stations.len()),
            ("media", staged.media.len()),
            ("playlists", staged.playlists.len()),
            ("smart_blocks", staged.smart_blocks.len()),
            ("shows", staged.shows.len()),
            ("webstreams", staged.webstreams.len()),
            ("users", staged.users.len()),
        ] {
            reporter.set_total(entity, total);
        }

        match self.walk(staged, &mut reporter).await {
            Ok(false) => {}
            Ok(true) | Err(Error::Cancelled) => return Ok(self.cancelled(started, &mut reporter)),
            Err(e) if self.outcome.imported.is_empty() => return Err(e),
            Err(e) => {
                warn!(
                    job_id = %self.ctx.job_id,
                    error = %e,
                    created = self.outcome.imported.total_count(),
                    "Commit aborted; keeping partial manifest"
                );
                self.outcome.error = Some(e.to_string());
                self.outcome.result.duration_seconds = started.elapsed().as_secs_f64();
                self.outcome.progress = Some(reporter.snapshot().clone());
                return Ok(self.outcome);
            }
        }

        self.outcome.result.duration_seconds = started.elapsed().as_secs_f64();
        reporter.finish(format!(
            "Import complete: {} created, {} skipped",
            self.outcome.result.total_created(),
            self.outcome.result.total_skipped()
        ));
        self.outcome.progress = Some(reporter.into_progress());

        info!(
            job_id = %self.ctx.job_id,
            created = self.outcome.result.total_created(),
            skipped = self.outcome.result.total_skipped(),
            duration_secs = self.outcome.result.duration_seconds,
            "Staged import committed"
        );
        Ok(self.outcome)
    }

    /// Every phase in dependency order; `true` when cut short by cancellation
    async fn walk(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<bool> {
        self.commit_stations(staged, reporter).await?;
        let phases: [(Phase, bool); 5] = [
            (Phase::Media, self.ctx.options.skip_media),
            (Phase::Playlists, self.ctx.options.skip_playlists),
            (Phase::SmartBlocks, self.ctx.options.skip_playlists),
            (Phase::Shows, self.ctx.options.skip_schedules),
            (Phase::Webstreams, self.ctx.options.skip_webstreams),
        ];
        for (phase, skipped) in phases {
            if self.ctx.cancel.is_cancelled() {
                return Ok(true);
            }
            if skipped {
                continue;
            }
            match phase {
                Phase::Media => {
                    if self.commit_media(staged, reporter).await? {
                        return Ok(true);
                    }
                }
                Phase::Playlists => self.commit_playlists(staged, reporter).await?,
                Phase::SmartBlocks => self.commit_smart_blocks(staged, reporter).await?,
                Phase::Shows => self.commit_shows(staged, reporter).await?,
                _ => self.commit_webstreams(staged, reporter).await?,
            }
        }

        if self.ctx.cancel.is_cancelled() {
            return Ok(true);
        }
        if !self.ctx.options.skip_users {
            self.commit_users(staged, reporter).await?;
        }

        reporter.begin_phase(Phase::Verifying, 1, "Verifying imported media");
        let verdict = verify_durations(
            self.ctx.services.domain.as_ref(),
            self.ctx.job_id,
            self.ctx.options.strict_duration_verification,
            &mut self.outcome.result,
        )
        .await?;
        if let DurationVerdict::Failed(message) = verdict {
            self.outcome.error = Some(message);
        }
        reporter.advance(1, "Verification complete");
        Ok(false)
    }

    fn cancelled(mut self, started: Instant, reporter: &mut ProgressReporter) -> ImportOutcome {
        warn!(job_id = %self.ctx.job_id, "Commit cancelled");
        self.outcome.cancelled = true;
        self.outcome.result.duration_seconds = started.elapsed().as_secs_f64();
        self.outcome.progress = Some(reporter.snapshot().clone());
        self.outcome
    }

    fn provenance(&self, source_id: impl Into<String>) -> ImportProvenance {
        ImportProvenance {
            source_type: self.ctx.source_type.as_str().to_string(),
            source_id: source_id.into(),
            job_id: self.ctx.job_id,
        }
    }

    async fn commit_stations(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.stations.iter().filter(|s| s.selected).collect();
        reporter.begin_phase(Phase::Stations, selected.len(), "Importing stations");

        if let Some(target) = &self.ctx.options.target_station_id {
            if !self.ctx.services.domain.station_exists(target).await? {
                return Err(Error::NotFound(format!("Target station {} does not exist", target)));
            }
            for station in &staged.stations {
                self.stations.insert(station.source_id.clone(), target.clone());
            }
            reporter.advance(selected.len(), format!("Importing into station {}", target));
            return Ok(());
        }

        for (done, station) in selected.iter().enumerate() {
            let source_id = ScopedSourceId::unscoped(station.source_id.clone());
            let existing = self
                .resolver
                .find_existing(EntityKind::Station, None, &source_id)
                .await?;
            let destination = match existing {
                Some(existing) => {
                    self.outcome.result.skip("station_already_imported");
                    self.outcome.result.mappings.push(Mapping::skipped(
                        "station",
                        station.source_id.clone(),
                        Some(existing.clone()),
                        station.name.clone(),
                        "already_imported",
                    ));
                    existing
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    let new_station = NewStation {
                        id: id.clone(),
                        name: station.name.clone(),
                        description: station.description.clone(),
                        timezone: station.timezone.clone(),
                        provenance: self.provenance(station.source_id.clone()),
                    };
                    self.ctx.services.domain.create_station(&new_station).await?;

                    self.outcome.result.stations_created += 1;
                    self.outcome.result.mappings.push(Mapping::created(
                        "station",
                        station.source_id.clone(),
                        id.clone(),
                        station.name.clone(),
                    ));
                    self.outcome.imported.station_ids.push(id.clone());
                    reporter.record_imported("stations", 1);
                    id
                }
            };
            self.stations.insert(station.source_id.clone(), destination);
            reporter.advance(done + 1, format!("Imported station {}", station.name));
        }

        let needs_station = staged.media.iter().any(|i| i.selected)
            || staged.playlists.iter().any(|i| i.selected)
            || staged.smart_blocks.iter().any(|i| i.selected)
            || staged.shows.iter().any(|i| i.selected)
            || staged.webstreams.iter().any(|i| i.selected);
        if needs_station && self.stations.is_empty() {
            // A deselected station may still have been imported by an earlier run
            for station in &staged.stations {
                let source_id = ScopedSourceId::unscoped(station.source_id.clone());
                if let Some(existing) = self
                    .resolver
                    .find_existing(EntityKind::Station, None, &source_id)
                    .await?
                {
                    self.stations.insert(station.source_id.clone(), existing);
                }
            }
            if self.stations.is_empty() {
                return Err(Error::InvalidInput(
                    "No destination station available: \
                     select a source station or set target_station_id"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Destination station for an item: its scoped station, else the only station
    fn station_for(&self, source_id: &ScopedSourceId) -> Option<String> {
        match &source_id.station {
            Some(station) => self.stations.get(station).cloned(),
            None => {
                let mut unique: Vec<&String> = self.stations.values().collect();
                unique.sort();
                unique.dedup();
                match unique.as_slice() {
                    [only] => Some((*only).clone()),
                    _ => None,
                }
            }
        }
    }

    /// Station lookup plus idempotency check; `None` means the item was skipped
    async fn resolve_item<T: StagedItem>(
        &mut self,
        item: &T,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<(String, Resolution)>> {
        let source_id = item.scoped_id();
        let Some(station_id) = self.station_for(&source_id) else {
            let source_station = source_id.station.clone().unwrap_or_default();
            let result = &mut self.outcome.result;
            result.skip(&format!("{}_no_station", kind));
            result.warn(format!(
                "No target station mapping found for source station {}",
                source_station
            ));
            result.mappings.push(Mapping::skipped(
                kind.as_str(),
                item.source_id(),
                None,
                name,
                "no_station",
            ));
            return Ok(None);
        };

        let resolution = match self
            .resolver
            .find_existing(kind, Some(&station_id), &source_id)
            .await?
        {
            Some(existing) => {
                let result = &mut self.outcome.result;
                result.skip(&format!("{}_already_imported", kind));
                result.mappings.push(Mapping::skipped(
                    kind.as_str(),
                    item.source_id(),
                    Some(existing.clone()),
                    name,
                    "already_imported",
                ));
                Resolution::Existing(existing)
            }
            None => Resolution::Create,
        };
        Ok(Some((station_id, resolution)))
    }

    /// Returns `true` when ingestion was cut short by cancellation
    async fn commit_media(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<bool> {
        let selected: Vec<_> = staged.media.iter().filter(|m| m.selected).collect();
        let mut tasks = Vec::new();
        for item in selected {
            match self.resolve_item(item, EntityKind::Media, &item.title).await? {
                Some((_, Resolution::Existing(existing))) => {
                    self.media.insert(item.source_id.clone(), existing);
                }
                Some((station_id, Resolution::Create)) => tasks.push(MediaTask {
                    item: item.clone(),
                    station_id,
                }),
                None => {}
            }
        }

        reporter.begin_phase(
            Phase::Media,
            tasks.len(),
            format!("Importing {} media files", tasks.len()),
        );
        let config = &self.ctx.services.config;
        let pipeline = IngestionPipeline::new(
            self.ctx.services.domain.clone(),
            self.ctx.services.blobs.clone(),
            config.concurrency,
            config.fetch_timeout,
            self.ctx.source_type.as_str(),
            self.ctx.job_id,
        );
        let report = pipeline
            .run(tasks, self.fetcher.clone(), &self.ctx.cancel, reporter)
            .await;

        for media in &report.ingested {
            self.media.insert(media.source_id.clone(), media.media_id.clone());
        }
        let cancelled = report.cancelled;
        report.merge_into(&mut self.outcome.result, &mut self.outcome.imported);
        Ok(cancelled)
    }

    /// Destination media for a playlist entry: this run, a known duplicate, or an
    /// earlier import
    async fn media_link(
        &self,
        staged: &StagedImport,
        source_id: &str,
        station_id: &str,
    ) -> Result<Option<String>> {
        if let Some(id) = self.media.get(source_id) {
            return Ok(Some(id.clone()));
        }
        if let Some(dup) = staged
            .media
            .iter()
            .find(|m| m.source_id == source_id)
            .and_then(|m| m.duplicate_of_id.clone())
        {
            return Ok(Some(dup));
        }
        self.resolver
            .find_existing(EntityKind::Media, Some(station_id), &ScopedSourceId::parse(source_id))
            .await
    }

    async fn create_entity(
        &mut self,
        kind: EntityKind,
        station_id: Option<String>,
        source_id: &str,
        name: &str,
        attributes: serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.ctx
            .services
            .domain
            .create_entity(&NewEntity {
                id: id.clone(),
                kind,
                station_id,
                name: name.to_string(),
                attributes,
                provenance: self.provenance(source_id),
            })
            .await?;

        self.outcome
            .result
            .mappings
            .push(Mapping::created(kind.as_str(), source_id, id.clone(), name));
        let imported = &mut self.outcome.imported;
        let result = &mut self.outcome.result;
        match kind {
            EntityKind::Playlist => {
                imported.playlist_ids.push(id.clone());
                result.playlists_created += 1;
            }
            EntityKind::SmartBlock => {
                imported.smart_block_ids.push(id.clone());
                result.smart_blocks_created += 1;
            }
            EntityKind::Show => {
                imported.show_ids.push(id.clone());
                result.shows_created += 1;
            }
            EntityKind::Clock => {
                imported.clock_ids.push(id.clone());
                result.clocks_created += 1;
            }
            EntityKind::Webstream => {
                imported.webstream_ids.push(id.clone());
                result.webstreams_created += 1;
            }
            EntityKind::User => {
                imported.user_ids.push(id.clone());
                result.users_created += 1;
            }
            EntityKind::Station | EntityKind::Media => {}
        }
        Ok(id)
    }

    async fn commit_playlists(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.playlists.iter().filter(|p| p.selected).collect();
        reporter.begin_phase(Phase::Playlists, selected.len(), "Importing playlists");

        for (done, playlist) in selected.into_iter().enumerate() {
            if let Some((station_id, Resolution::Create)) = self
                .resolve_item(playlist, EntityKind::Playlist, &playlist.name)
                .await?
            {
                let mut entries = Vec::new();
                let mut missing = 0usize;
                for media_source in &playlist.media_source_ids {
                    match self.media_link(staged, media_source, &station_id).await? {
                        Some(id) => entries.push(id),
                        None => missing += 1,
                    }
                }
                if missing > 0 {
                    self.outcome.result.skip_n("playlist_media_missing", missing);
                    self.outcome.result.warn(format!(
                        "Playlist '{}': {} media entries not found",
                        playlist.name, missing
                    ));
                }

                self.create_entity(
                    EntityKind::Playlist,
                    Some(station_id),
                    &playlist.source_id,
                    &playlist.name,
                    json!({
                        "description": playlist.description,
                        "media_ids": entries,
                    }),
                )
                .await?;
                reporter.record_imported("playlists", 1);
            }
            reporter.advance(done + 1, format!("Imported playlist {}", playlist.name));
        }
        Ok(())
    }

    async fn commit_smart_blocks(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.smart_blocks.iter().filter(|b| b.selected).collect();
        reporter.begin_phase(Phase::SmartBlocks, selected.len(), "Importing smart blocks");

        for (done, block) in selected.into_iter().enumerate() {
            if let Some((station_id, Resolution::Create)) = self
                .resolve_item(block, EntityKind::SmartBlock, &block.name)
                .await?
            {
                self.create_entity(
                    EntityKind::SmartBlock,
                    Some(station_id),
                    &block.source_id,
                    &block.name,
                    json!({ "rules": block.rules }),
                )
                .await?;
                reporter.record_imported("smart_blocks", 1);
            }
            reporter.advance(done + 1, format!("Imported smart block {}", block.name));
        }
        Ok(())
    }

    async fn commit_shows(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.shows.iter().filter(|s| s.selected).collect();
        reporter.begin_phase(Phase::Shows, selected.len(), "Importing shows");

        for (done, show) in selected.into_iter().enumerate() {
            let kind = show_kind(show);
            if kind == EntityKind::Clock && show.create_show {
                self.outcome.result.warn(format!(
                    "Show '{}' has no recurrence rule; imported as a clock",
                    show.name
                ));
            }

            if let Some((station_id, Resolution::Create)) =
                self.resolve_item(show, kind, &show.name).await?
            {
                let attributes = match kind {
                    EntityKind::Show => json!({
                        "description": show.description,
                        "rrule": show.effective_rrule(),
                        "dtstart": show.dtstart,
                        "duration_minutes": show.duration_minutes,
                        "timezone": show.timezone,
                    }),
                    _ => json!({
                        "description": show.description,
                        "duration_minutes": show.duration_minutes,
                    }),
                };
                self.create_entity(kind, Some(station_id), &show.source_id, &show.name, attributes)
                    .await?;
                reporter.record_imported("shows", 1);
            }
            reporter.advance(done + 1, format!("Imported show {}", show.name));
        }
        Ok(())
    }

    async fn commit_webstreams(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.webstreams.iter().filter(|w| w.selected).collect();
        reporter.begin_phase(Phase::Webstreams, selected.len(), "Importing webstreams");

        for (done, webstream) in selected.into_iter().enumerate() {
            if let Some((station_id, Resolution::Create)) = self
                .resolve_item(webstream, EntityKind::Webstream, &webstream.name)
                .await?
            {
                self.create_entity(
                    EntityKind::Webstream,
                    Some(station_id),
                    &webstream.source_id,
                    &webstream.name,
                    json!({ "urls": webstream.urls }),
                )
                .await?;
                reporter.record_imported("webstreams", 1);
            }
            reporter.advance(done + 1, format!("Imported webstream {}", webstream.name));
        }
        Ok(())
    }

    async fn commit_users(
        &mut self,
        staged: &StagedImport,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let selected: Vec<_> = staged.users.iter().filter(|u| u.selected).collect();
        reporter.begin_phase(Phase::Users, selected.len(), "Importing users");

        for (done, user) in selected.into_iter().enumerate() {
            let source_id = user.scoped_id();
            match self
                .resolver
                .find_existing(EntityKind::User, None, &source_id)
                .await?
            {
                Some(existing) => {
                    let result = &mut self.outcome.result;
                    result.skip("user_already_imported");
                    result.mappings.push(Mapping::skipped(
                        "user",
                        user.source_id.clone(),
                        Some(existing),
                        user.login.clone(),
                        "already_imported",
                    ));
                }
                None => {
                    self.create_entity(
                        EntityKind::User,
                        None,
                        &user.source_id,
                        &user.login,
                        json!({
                            "email": user.email,
                            "role": user.role,
                            "imported_by": self.ctx.options.importing_user_id,
                        }),
                    )
                    .await?;
                    reporter.record_imported("users", 1);
                }
            }
            reporter.advance(done + 1, format!("Imported user {}", user.login));
        }
        Ok(())
    }
}

/// Shows need a recurrence rule; everything else becomes a clock
fn show_kind(show: &StagedShowItem) -> EntityKind {
    if show.create_show && show.effective_rrule().is_some() {
        EntityKind::Show
    } else {
        EntityKind::Clock
    }
}
