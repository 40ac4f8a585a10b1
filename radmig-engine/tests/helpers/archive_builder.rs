//! Backup archive builder
//!
//! Writes a gzip tar holding `manifest.json` plus payload files, the layout the
//! archive adapter reads.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SONG_A: &[u8] = b"ID3\x03 song a payload bytes";
pub const SONG_B: &[u8] = b"ID3\x03 song b payload bytes";

pub struct ArchiveBuilder {
    manifest: Value,
    files: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new(manifest: Value) -> Self {
        Self {
            manifest,
            files: Vec::new(),
        }
    }

    /// [`sample_manifest`] with its payload files
    ///
    /// `media/2/10.mp3` carries the same bytes as `media/1/10.mp3`.
    pub fn sample() -> Self {
        Self::new(sample_manifest())
            .file("media/1/10.mp3", SONG_A)
            .file("media/1/11.mp3", SONG_B)
            .file("media/2/10.mp3", SONG_A)
    }

    pub fn file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.push((path.to_string(), bytes.to_vec()));
        self
    }

    pub fn write(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut tar = tar::Builder::new(encoder);

        append(&mut tar, "manifest.json", &serde_json::to_vec(&self.manifest).unwrap());
        for (file_path, bytes) in &self.files {
            append(&mut tar, file_path, bytes);
        }

        tar.into_inner().unwrap().finish().unwrap();
        path
    }
}

fn append<W: Write>(tar: &mut tar::Builder<W>, path: &str, bytes: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    tar.append_data(&mut header, path, bytes).unwrap();
}

/// Two stations sharing a raw media ID, one weekly show, and one of every other
/// entity type
pub fn sample_manifest() -> Value {
    json!({
        "stations": [
            {"id": "1", "name": "KXYZ", "timezone": "America/Chicago"},
            {"id": "2", "name": "KABC"}
        ],
        "media": [
            {"id": "10", "station_id": "1", "title": "Song A", "artist": "Artist", "album": "First",
             "duration_ms": 180000, "path": "media/1/10.mp3"},
            {"id": "11", "station_id": "1", "title": "Song B", "artist": "Artist", "album": "First",
             "duration_ms": 200000, "path": "media/1/11.mp3"},
            {"id": "10", "station_id": "2", "title": "Song A (relay)", "artist": "Artist",
             "duration_ms": 180000, "path": "media/2/10.mp3"}
        ],
        "playlists": [
            {"id": "5", "station_id": "1", "name": "Morning Mix", "media_ids": ["10", "11"]}
        ],
        "smart_blocks": [
            {"id": "7", "station_id": "1", "name": "Jazz Rotation",
             "rules": {"kind": "criteria",
                       "criteria": [{"field": "genre", "operator": "is", "value": "jazz"}]}}
        ],
        "shows": [
            {"id": "3", "station_id": "1", "name": "Morning Drive", "timezone": "America/Chicago",
             "instances": [
                {"starts_at": "2026-01-05T06:00:00-06:00", "ends_at": "2026-01-05T09:00:00-06:00"},
                {"starts_at": "2026-01-12T06:00:00-06:00", "ends_at": "2026-01-12T09:00:00-06:00"},
                {"starts_at": "2026-01-19T06:00:00-06:00", "ends_at": "2026-01-19T09:00:00-06:00"},
                {"starts_at": "2026-01-26T06:00:00-06:00", "ends_at": "2026-01-26T09:00:00-06:00"}
             ]}
        ],
        "webstreams": [
            {"id": "4", "station_id": "2", "name": "Relay",
             "urls": ["http://relay.example.net/live"]}
        ],
        "users": [
            {"id": "u1", "login": "dj", "email": "dj@example.net", "role": "dj"}
        ]
    })
}
