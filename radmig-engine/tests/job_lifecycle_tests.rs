//! Direct import lifecycle tests
//!
//! Drive the migration service end to end against a temp database and a real
//! backup archive.

mod helpers;

use helpers::{archive_options, sample_manifest, wait_for_run, ArchiveBuilder, TestEnv};
use radmig_common::events::MigrationEvent;
use radmig_common::Error;
use radmig_engine::adapters::archive::SOURCE_TYPE;
use radmig_engine::models::{AnomalyClass, JobStatus, Phase, SourceType};
use serde_json::json;

#[tokio::test]
async fn test_direct_import_creates_every_entity() {
    let env = TestEnv::new().await;
    let mut events = env.service.event_bus().subscribe();
    let archive = env.sample_archive();

    let job = env.run_direct_import(archive_options(&archive)).await;

    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert!(job.error.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let result = job.result.as_ref().expect("completed job keeps its result");
    assert_eq!(result.stations_created, 2);
    assert_eq!(result.media_items_imported, 3);
    assert_eq!(result.playlists_created, 1);
    assert_eq!(result.smart_blocks_created, 1);
    assert_eq!(result.shows_created, 1, "four weekly instances form a show");
    assert_eq!(result.clocks_created, 0);
    assert_eq!(result.webstreams_created, 1);
    assert_eq!(result.users_created, 1);

    assert_eq!(env.count("stations").await, 2);
    assert_eq!(env.count("media_items").await, 3);
    assert_eq!(env.count_kind("playlist").await, 1);
    assert_eq!(env.count_kind("smart_block").await, 1);
    assert_eq!(env.count_kind("show").await, 1);
    assert_eq!(env.count_kind("webstream").await, 1);
    assert_eq!(env.count_kind("user").await, 1);

    // media/2/10.mp3 repeats media/1/10.mp3 byte for byte
    assert_eq!(env.blobs.stores(), 2);
    assert_eq!(result.skipped.get("media_deduplicated"), Some(&1));
    let report = job.anomaly_report.as_ref().expect("skips produce a report");
    assert_eq!(report.count(AnomalyClass::DuplicateResolution), 1);

    let items = env.service.get_imported_items(job.id).await.unwrap();
    assert_eq!(items.station_ids.len(), 2);
    assert_eq!(items.media_ids.len(), 3);
    assert_eq!(items.show_ids.len(), 1);
    assert_eq!(items.total_count(), 10);

    assert_eq!(job.progress.phase, Phase::Finished);
    assert!((job.progress.percentage - 100.0).abs() < f64::EPSILON);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() == job.id {
            seen.push(event);
        }
    }
    assert!(matches!(seen.first(), Some(MigrationEvent::JobCreated { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, MigrationEvent::JobCompleted { created_total: 10, .. })));
    assert!(seen.iter().any(|e| matches!(e, MigrationEvent::JobProgress { .. })));
    let transitions: Vec<(String, String)> = seen
        .iter()
        .filter_map(|e| match e {
            MigrationEvent::JobStatusChanged {
                old_status,
                new_status,
                ..
            } => Some((old_status.clone(), new_status.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            ("pending".to_string(), "validating".to_string()),
            ("validating".to_string(), "running".to_string()),
            ("running".to_string(), "completed".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_mappings_are_queryable_by_either_id() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let job = env.run_direct_import(archive_options(&archive)).await;
    assert_eq!(job.status, JobStatus::Completed);

    let mappings = env.service.get_mappings(job.id).await.unwrap();
    assert!(mappings.iter().any(|m| m.entity_type == "station" && m.old_id == "1"));
    assert_eq!(mappings.iter().filter(|m| m.entity_type == "media").count(), 3);

    // Raw ID 10 exists in both stations; scoped IDs keep them apart
    let song = env.service.find_mappings("1::10").await.unwrap();
    assert_eq!(song.len(), 1);
    assert_eq!(song[0].name, "Song A");
    assert!(!song[0].skipped);

    let by_new_id = env.service.find_mappings(&song[0].new_id).await.unwrap();
    assert_eq!(by_new_id.len(), 1);
    assert_eq!(by_new_id[0].old_id, "1::10");
}

#[tokio::test]
async fn test_second_import_of_same_archive_creates_nothing() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();

    let first = env.run_direct_import(archive_options(&archive)).await;
    assert_eq!(first.status, JobStatus::Completed);
    let uploads = env.blobs.stores();

    let second = env.run_direct_import(archive_options(&archive)).await;
    assert_eq!(second.status, JobStatus::Completed, "error: {:?}", second.error);

    let result = second.result.unwrap();
    assert_eq!(result.total_created(), 0);
    assert_eq!(result.skipped.get("station_already_imported"), Some(&2));
    assert_eq!(result.skipped.get("media_already_imported"), Some(&3));
    assert_eq!(result.skipped.get("playlist_already_imported"), Some(&1));
    assert_eq!(result.skipped.get("user_already_imported"), Some(&1));
    assert_eq!(env.blobs.stores(), uploads, "no payload uploaded twice");

    assert_eq!(env.count("stations").await, 2);
    assert_eq!(env.count("media_items").await, 3);
    assert_eq!(env.count_kind("show").await, 1);

    let report = second.anomaly_report.expect("skips produce a report");
    assert!(report.count(AnomalyClass::SkippedEntities) >= 8);
    assert_eq!(report.total, result.total_skipped());
}

#[tokio::test]
async fn test_target_station_receives_everything() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let first = env.run_direct_import(archive_options(&archive)).await;
    let target = first.imported_items.unwrap().station_ids[0].clone();

    let manifest = json!({
        "stations": [{"id": "9", "name": "Old"}],
        "playlists": [{"id": "1", "station_id": "9", "name": "Evening", "media_ids": []}]
    });
    let other = ArchiveBuilder::new(manifest).write(env.dir.path(), "other.tgz");
    let mut options = archive_options(&other);
    options.target_station_id = Some(target.clone());

    let job = env.run_direct_import(options).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    let result = job.result.unwrap();
    assert_eq!(result.stations_created, 0);
    assert_eq!(result.playlists_created, 1);

    let station: String = sqlx::query_scalar(
        "SELECT station_id FROM library_entities WHERE kind = 'playlist' AND name = 'Evening'",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(station, target);
}

#[tokio::test]
async fn test_skip_flags_leave_categories_alone() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let mut options = archive_options(&archive);
    options.skip_media = true;
    options.skip_users = true;
    options.skip_webstreams = true;

    let job = env.run_direct_import(options).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert_eq!(env.count("media_items").await, 0);
    assert_eq!(env.count_kind("user").await, 0);
    assert_eq!(env.count_kind("webstream").await, 0);
    assert_eq!(env.count_kind("playlist").await, 1);
    assert_eq!(env.blobs.stores(), 0);
}

#[tokio::test]
async fn test_unregistered_source_type_is_refused() {
    let env = TestEnv::new().await;
    let err = env
        .service
        .create_job(SourceType::new("ftp"), Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(_)), "got {:?}", err);
    assert!(env.service.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_target_station_fails_validation() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let mut options = archive_options(&archive);
    options.target_station_id = Some("   ".to_string());

    let err = env
        .service
        .create_job(SourceType::new(SOURCE_TYPE), options)
        .await
        .unwrap_err();
    match err {
        Error::Validation(errors) => assert!(errors.to_string().contains("target_station_id")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_archive_fails_during_validation() {
    let env = TestEnv::new().await;
    let options = archive_options(&env.dir.path().join("nowhere.tar.gz"));

    let job = env.run_direct_import(options).await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("source.archive_path"), "error: {}", error);
    assert_eq!(env.count("stations").await, 0);
}

#[tokio::test]
async fn test_unknown_target_station_fails_job() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let mut options = archive_options(&archive);
    options.target_station_id = Some("no-such-station".to_string());

    let job = env.run_direct_import(options).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("no-such-station"));
    assert_eq!(env.count("media_items").await, 0);
}

#[tokio::test]
async fn test_strict_duration_fails_but_keeps_imported_items() {
    let env = TestEnv::new().await;
    let mut manifest = sample_manifest();
    manifest["media"] = json!([
        {"id": "10", "station_id": "1", "title": "No Length", "path": "media/1/10.mp3"}
    ]);
    manifest["playlists"] = json!([]);
    let archive = ArchiveBuilder::new(manifest)
        .file("media/1/10.mp3", helpers::SONG_A)
        .write(env.dir.path(), "strict.tar.gz");

    let mut options = archive_options(&archive);
    options.strict_duration_verification = true;
    let job = env.run_direct_import(options).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap_or_default().contains("Duration verification"));
    let items = job.imported_items.expect("failed run keeps its manifest");
    assert_eq!(items.media_ids.len(), 1);
    assert_eq!(
        job.result.unwrap().skipped.get("media_duration_zero"),
        Some(&1)
    );
}

#[tokio::test]
async fn test_lenient_duration_only_warns() {
    let env = TestEnv::new().await;
    let mut manifest = sample_manifest();
    manifest["media"] = json!([
        {"id": "10", "station_id": "1", "title": "No Length", "path": "media/1/10.mp3"}
    ]);
    manifest["playlists"] = json!([]);
    let archive = ArchiveBuilder::new(manifest)
        .file("media/1/10.mp3", helpers::SONG_A)
        .write(env.dir.path(), "lenient.tar.gz");

    let job = env.run_direct_import(archive_options(&archive)).await;
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    let result = job.result.unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Duration verification")));
}

#[tokio::test]
async fn test_analyze_source_is_a_dry_run() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();

    let estimate = env
        .service
        .analyze_source(&SourceType::new(SOURCE_TYPE), &archive_options(&archive))
        .await
        .unwrap();
    assert_eq!(estimate.stations_created, 2);
    assert_eq!(estimate.media_items_imported, 3);

    assert_eq!(env.count("stations").await, 0);
    assert!(env.service.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_twice_reports_already_started() {
    let env = TestEnv::new().await;
    let archive = env.sample_archive();
    let job = env
        .service
        .create_job(SourceType::new(SOURCE_TYPE), archive_options(&archive))
        .await
        .unwrap();

    env.service.start_job(job.id).await.unwrap();
    let err = env.service.start_job(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);
    assert!(err.to_string().contains("already started"));

    let job = wait_for_run(&env.service, job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
}
