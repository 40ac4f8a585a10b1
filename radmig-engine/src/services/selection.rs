//! Selection edits on a staged import
//!
//! An edit is validated in full, applied to a copy, then swapped in, so a rejected
//! batch leaves the snapshot untouched. Duplicate markers belong to analysis and are
//! never changed here.

use radmig_common::{Error, Result, ValidationErrors};
use std::collections::HashSet;

use crate::models::{ImportSelections, StagedImport, StagedImportStatus, StagedItem};

fn validate(staged: &StagedImport, selections: &ImportSelections) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let show_ids: HashSet<&str> = staged.shows.iter().map(|s| s.source_id.as_str()).collect();

    for (show_id, rule) in &selections.custom_rrules {
        if !show_ids.contains(show_id.as_str()) {
            errors.add(
                format!("custom_rrules.{}", show_id),
                "no staged show has this ID",
            );
        }
        if rule.trim().is_empty() {
            errors.add(
                format!("custom_rrules.{}", show_id),
                "recurrence rule must not be empty",
            );
        }
    }

    let as_clocks: HashSet<&str> = selections
        .shows_as_clocks
        .iter()
        .map(String::as_str)
        .collect();
    for show_id in &selections.shows_as_shows {
        if as_clocks.contains(show_id.as_str()) {
            errors.add(
                format!("shows_as_shows.{}", show_id),
                "a show cannot be created as both show and clock",
            );
        }
    }

    errors
}

/// Selected = listed in `ids` and passing the station filter
fn select_exact<T: StagedItem>(items: &mut [T], ids: &[String], stations: &[String]) {
    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    for item in items {
        let selected = wanted.contains(item.source_id())
            && (stations.is_empty() || item.scoped_id().passes_station_filter(stations));
        item.set_selected(selected);
    }
}

/// Apply one selection batch atomically
pub fn apply_selections(staged: &mut StagedImport, selections: &ImportSelections) -> Result<()> {
    if staged.status != StagedImportStatus::Ready {
        return Err(Error::InvalidState(format!(
            "Staged import {} is {}; selections can only change while ready",
            staged.id, staged.status
        )));
    }
    validate(staged, selections).into_result()?;

    let mut next = staged.clone();
    let stations = &selections.station_ids;

    if !stations.is_empty() {
        for station in &mut next.stations {
            station.selected = stations.contains(&station.source_id);
        }
    }
    select_exact(&mut next.media, &selections.media_ids, stations);
    select_exact(&mut next.playlists, &selections.playlist_ids, stations);
    select_exact(&mut next.smart_blocks, &selections.smart_block_ids, stations);
    select_exact(&mut next.shows, &selections.show_ids, stations);
    select_exact(&mut next.webstreams, &selections.webstream_ids, stations);
    select_exact(&mut next.users, &selections.user_ids, stations);

    for show in &mut next.shows {
        if selections.shows_as_shows.contains(&show.source_id) {
            show.create_show = true;
            show.create_clock = false;
        } else if selections.shows_as_clocks.contains(&show.source_id) {
            show.create_show = false;
            show.create_clock = true;
        }
        if let Some(rule) = selections.custom_rrules.get(&show.source_id) {
            show.custom_rrule = Some(rule.trim().to_string());
        }
    }

    next.selections = Some(selections.clone());
    *staged = next;

    tracing::debug!(
        staged_import_id = %staged.id,
        selected = staged.selected_count(),
        station_filter = ?selections.station_ids,
        "Applied selections"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        SourceType, StagedMediaItem, StagedPlaylistItem, StagedShowItem, StagedSmartBlockItem,
        StagedStationItem, StagedWebstreamItem,
    };
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn staged() -> StagedImport {
        let mut staged = StagedImport::new(Uuid::new_v4(), SourceType::new("archive"));
        staged.stations = vec![
            StagedStationItem {
                source_id: "1".into(),
                selected: true,
                ..Default::default()
            },
            StagedStationItem {
                source_id: "2".into(),
                selected: true,
                ..Default::default()
            },
        ];
        staged.media = vec![
            StagedMediaItem {
                source_id: "1::m1".into(),
                ..Default::default()
            },
            StagedMediaItem {
                source_id: "2::m2".into(),
                is_duplicate: true,
                duplicate_of_id: Some("existing".into()),
                ..Default::default()
            },
            StagedMediaItem {
                source_id: "m3".into(),
                ..Default::default()
            },
        ];
        staged.playlists = vec![
            StagedPlaylistItem {
                source_id: "1::p1".into(),
                ..Default::default()
            },
            StagedPlaylistItem {
                source_id: "2::p2".into(),
                ..Default::default()
            },
        ];
        staged.shows = vec![
            StagedShowItem {
                source_id: "1::sh1".into(),
                ..Default::default()
            },
            StagedShowItem {
                source_id: "2::sh2".into(),
                create_clock: true,
                ..Default::default()
            },
        ];
        staged.smart_blocks = vec![StagedSmartBlockItem {
            source_id: "2::sb1".into(),
            ..Default::default()
        }];
        staged.webstreams = vec![StagedWebstreamItem {
            source_id: "2::ws1".into(),
            ..Default::default()
        }];
        staged
    }

    fn station_two_selections() -> ImportSelections {
        ImportSelections {
            station_ids: vec!["2".into()],
            media_ids: vec!["1::m1".into(), "2::m2".into(), "m3".into()],
            playlist_ids: vec!["1::p1".into(), "2::p2".into()],
            smart_block_ids: vec!["2::sb1".into()],
            show_ids: vec!["1::sh1".into(), "2::sh2".into()],
            webstream_ids: vec!["2::ws1".into()],
            shows_as_shows: vec!["2::sh2".into()],
            shows_as_clocks: vec![],
            custom_rrules: BTreeMap::from([(
                "2::sh2".to_string(),
                "FREQ=WEEKLY;BYDAY=MO".to_string(),
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_station_filter_with_scoped_ids() {
        let mut staged = staged();
        apply_selections(&mut staged, &station_two_selections()).unwrap();

        assert!(!staged.stations[0].selected);
        assert!(staged.stations[1].selected);
        assert!(!staged.media[0].selected, "station 1 media is filtered out");
        assert!(staged.media[1].selected);
        assert!(staged.media[2].selected, "unscoped media stays selectable");
        assert!(!staged.playlists[0].selected);
        assert!(staged.playlists[1].selected);
        assert!(!staged.shows[0].selected);
        assert!(staged.shows[1].selected);
        assert!(staged.smart_blocks[0].selected);
        assert!(staged.webstreams[0].selected);

        let show = &staged.shows[1];
        assert!(show.create_show && !show.create_clock);
        assert_eq!(show.custom_rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert!(staged.selections.is_some());
    }

    #[test]
    fn test_duplicate_flags_survive_selection() {
        let mut staged = staged();
        let selections = ImportSelections {
            media_ids: vec!["2::m2".into()],
            ..Default::default()
        };
        apply_selections(&mut staged, &selections).unwrap();
        assert!(staged.media[1].selected);
        assert!(staged.media[1].is_duplicate);
        assert_eq!(staged.media[1].duplicate_of_id.as_deref(), Some("existing"));

        apply_selections(&mut staged, &ImportSelections::default()).unwrap();
        assert!(!staged.media[1].selected);
        assert!(staged.media[1].is_duplicate);
    }

    #[test]
    fn test_invalid_batch_changes_nothing() {
        let mut staged = staged();
        let before = serde_json::to_value(&staged).unwrap();

        let mut selections = station_two_selections();
        selections.shows_as_clocks = vec!["2::sh2".into()];
        selections
            .custom_rrules
            .insert("9::unknown".into(), "FREQ=DAILY".into());

        match apply_selections(&mut staged, &selections) {
            Err(Error::Validation(errors)) => assert_eq!(errors.errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(serde_json::to_value(&staged).unwrap(), before);
    }

    #[test]
    fn test_committed_snapshot_is_frozen() {
        let mut staged = staged();
        staged.status = StagedImportStatus::Committed;
        assert!(matches!(
            apply_selections(&mut staged, &ImportSelections::default()),
            Err(Error::InvalidState(_))
        ));
    }
}
