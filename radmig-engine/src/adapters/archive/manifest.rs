//! `manifest.json` of a backup archive and its conversion into a staged snapshot

use radmig_common::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::models::{
    ScopedSourceId, SmartBlockRules, SourceType, StagedImport, StagedMediaItem,
    StagedPlaylistItem, StagedShowItem, StagedSmartBlockItem, StagedStationItem, StagedUserItem,
    StagedWebstreamItem,
};
use crate::services::archive_extractor::safe_join;
use crate::services::content_hasher::hash_file;
use crate::services::staged_analyzer::{detect_recurrence, ShowInstance};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub stations: Vec<ManifestStation>,
    pub media: Vec<ManifestMedia>,
    pub playlists: Vec<ManifestPlaylist>,
    pub smart_blocks: Vec<ManifestSmartBlock>,
    pub shows: Vec<ManifestShow>,
    pub webstreams: Vec<ManifestWebstream>,
    pub users: Vec<ManifestUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestStation {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestMedia {
    pub id: String,
    pub station_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: Option<u64>,
    /// Path of the payload inside the archive
    pub path: String,
    pub artwork_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestPlaylist {
    pub id: String,
    pub station_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Raw media IDs of the same station, in play order
    pub media_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSmartBlock {
    pub id: String,
    pub station_id: String,
    pub name: String,
    pub rules: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestShow {
    pub id: String,
    pub station_id: String,
    pub name: String,
    pub description: Option<String>,
    pub timezone: Option<String>,
    pub instances: Vec<ShowInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestWebstream {
    pub id: String,
    pub station_id: String,
    pub name: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestUser {
    pub id: String,
    pub login: String,
    pub email: Option<String>,
    pub role: String,
}

fn scoped(station: &str, raw: &str) -> String {
    if station.is_empty() {
        ScopedSourceId::unscoped(raw).to_string()
    } else {
        ScopedSourceId::new(station, raw).to_string()
    }
}

/// Known rule shapes are typed; anything else is kept verbatim
pub fn parse_rules(value: &serde_json::Value) -> SmartBlockRules {
    if value.is_null() {
        return SmartBlockRules::default();
    }
    serde_json::from_value(value.clone()).unwrap_or_else(|_| SmartBlockRules::Opaque {
        raw: serde_json::to_vec(value).unwrap_or_default(),
    })
}

impl Manifest {
    /// Snapshot of everything in the manifest, nothing selected yet
    ///
    /// Payload files under `root` are sized and hashed so duplicate detection can
    /// match by digest.
    pub async fn to_staged(
        &self,
        job_id: Uuid,
        source_type: SourceType,
        root: &Path,
    ) -> Result<StagedImport> {
        let mut staged = StagedImport::new(job_id, source_type);

        staged.stations = self
            .stations
            .iter()
            .map(|s| StagedStationItem {
                source_id: s.id.clone(),
                name: s.name.clone(),
                description: s.description.clone(),
                timezone: s.timezone.clone(),
                selected: false,
            })
            .collect();

        for m in &self.media {
            let (file_size, content_hash) = match safe_join(root, Path::new(&m.path)) {
                Ok(path) => match tokio::fs::metadata(&path).await {
                    Ok(meta) if meta.is_file() => (Some(meta.len()), Some(hash_file(&path).await?)),
                    _ => (None, None),
                },
                Err(_) => (None, None),
            };
            staged.media.push(StagedMediaItem {
                source_id: scoped(&m.station_id, &m.id),
                title: m.title.clone(),
                artist: m.artist.clone(),
                album: m.album.clone(),
                duration_ms: m.duration_ms,
                file_size,
                content_hash,
                locator: m.path.clone(),
                artwork_locator: m.artwork_path.clone(),
                ..Default::default()
            });
        }

        staged.playlists = self
            .playlists
            .iter()
            .map(|p| StagedPlaylistItem {
                source_id: scoped(&p.station_id, &p.id),
                name: p.name.clone(),
                description: p.description.clone(),
                item_count: p.media_ids.len(),
                media_source_ids: p
                    .media_ids
                    .iter()
                    .map(|id| scoped(&p.station_id, id))
                    .collect(),
                selected: false,
            })
            .collect();

        staged.smart_blocks = self
            .smart_blocks
            .iter()
            .map(|b| StagedSmartBlockItem {
                source_id: scoped(&b.station_id, &b.id),
                name: b.name.clone(),
                rules: parse_rules(&b.rules),
                selected: false,
            })
            .collect();

        staged.shows = self.shows.iter().map(stage_show).collect();

        staged.webstreams = self
            .webstreams
            .iter()
            .map(|w| StagedWebstreamItem {
                source_id: scoped(&w.station_id, &w.id),
                name: w.name.clone(),
                urls: w.urls.clone(),
                selected: false,
            })
            .collect();

        staged.users = self
            .users
            .iter()
            .map(|u| StagedUserItem {
                source_id: u.id.clone(),
                login: u.login.clone(),
                email: u.email.clone(),
                role: u.role.clone(),
                selected: false,
            })
            .collect();

        Ok(staged)
    }
}

fn stage_show(show: &ManifestShow) -> StagedShowItem {
    let mut item = StagedShowItem {
        source_id: scoped(&show.station_id, &show.id),
        name: show.name.clone(),
        description: show.description.clone(),
        instance_count: show.instances.len(),
        timezone: show.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
        ..Default::default()
    };

    if let Some(first) = show.instances.iter().min_by_key(|i| i.starts_at) {
        item.dtstart = Some(first.starts_at.with_timezone(&chrono::Utc));
        item.duration_minutes = (first.ends_at - first.starts_at).num_minutes().max(0) as u32;
    }

    if let Some(recurrence) = detect_recurrence(&show.instances) {
        item.detected_rrule = Some(recurrence.rrule);
        item.pattern_confidence = recurrence.confidence;
        item.pattern_description = Some(recurrence.pattern);
        item.dtstart = Some(recurrence.dtstart);
        item.duration_minutes = recurrence.duration_minutes;
    }
    item
}
