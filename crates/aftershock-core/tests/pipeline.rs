//! End-to-end tests of the ingestion saga against a fake feed and the
//! memory store.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::arithmetic_side_effects,
    clippy::float_cmp
)]

mod common;

use std::fs::File;

use aftershock_core::{EPICENTER_FILE, MergeStrategy, export_file_name};
use aftershock_types::{EventId, HazardDataset, Transition, UnitId};
use common::{
    GRANULARITY, Harness, PGA_ONLY_TRACT, Published, SHAKEN_TRACT, UPDATED_MS, hazard_archive,
};

async fn transitions(harness: &Harness, id: &str) -> Vec<Transition> {
    harness
        .store
        .status_history(&EventId::new(id))
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.transition)
        .collect()
}

async fn cell_count(harness: &Harness, id: &str) -> u64 {
    harness
        .store
        .hazard_cell_count(&EventId::new(id), None)
        .await
        .unwrap()
}

fn archive_entries(harness: &Harness, id: &str, archive: &str) -> Vec<String> {
    let file = File::open(harness.event_dir(id).join(archive)).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_owned).collect();
    names.sort();
    names
}

// =============================================================================
// First ingestion and re-runs
// =============================================================================

#[tokio::test]
async fn first_ingestion_records_cells_exposure_and_one_ledger_entry() {
    let harness = Harness::new().await;
    harness.publish(&Published::new("ci40001")).await;

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.new, 1);
    assert_eq!(summary.failed, 0);

    assert_eq!(transitions(&harness, "ci40001").await, vec![Transition::New]);
    let id = EventId::new("ci40001");
    for dataset in HazardDataset::PROCESSING_ORDER {
        let cells = harness
            .store
            .hazard_cell_count(&id, Some(dataset))
            .await
            .unwrap();
        assert!(cells > 0, "no {dataset} cells");
    }
    assert_eq!(cell_count(&harness, "ci40001").await, 4);

    let exposure = harness.store.exposure_records(&id, GRANULARITY).await.unwrap();
    assert_eq!(exposure.len(), 1);
    let record = exposure.first().unwrap();
    assert_eq!(record.unit_id, UnitId::new(SHAKEN_TRACT));
    let intensity = record.intensity.unwrap();
    assert_eq!(intensity.max, 5.0);
    assert_eq!(intensity.min, 4.5);
    assert!((intensity.avg - 4.75).abs() < 1e-9);
    assert_eq!(record.severity_class, Some(5));
    assert!((record.acceleration.unwrap().max - 0.12).abs() < 1e-9);
    assert!((record.velocity.unwrap().max - 3.0).abs() < 1e-9);

    let files = harness.event_files("ci40001");
    assert!(files.contains(&EPICENTER_FILE.to_owned()));
    assert!(files.contains(&"mi.shp".to_owned()));
    let export = harness
        .event_dir("ci40001")
        .join(export_file_name(GRANULARITY, &id));
    assert_eq!(std::fs::read_to_string(export).unwrap().lines().count(), 1);
    assert!(harness.archives("ci40001").is_empty());
}

#[tokio::test]
async fn identical_rerun_is_unchanged_and_only_logged() {
    let harness = Harness::new().await;
    harness.publish(&Published::new("ci40002")).await;
    harness.pipeline.run_once().await.unwrap();
    let id = EventId::new("ci40002");
    let exposure_before = harness.store.exposure_records(&id, GRANULARITY).await.unwrap();
    let downloads_before = harness.fetcher.requests().await.len();

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.new, 0);

    assert_eq!(
        transitions(&harness, "ci40002").await,
        vec![Transition::New, Transition::Unchanged]
    );
    assert_eq!(cell_count(&harness, "ci40002").await, 4);
    assert_eq!(
        harness.store.exposure_records(&id, GRANULARITY).await.unwrap(),
        exposure_before
    );
    assert!(harness.archives("ci40002").is_empty());

    // Feed and detail only; the archive is not downloaded again.
    let requests = harness.fetcher.requests().await;
    assert_eq!(requests.len(), downloads_before + 2);
    assert!(!requests.iter().skip(downloads_before).any(|url| url.ends_with("shape.zip")));
}

// =============================================================================
// Updates and archival
// =============================================================================

#[tokio::test]
async fn updated_version_archives_previous_artifacts_once() {
    let harness = Harness::new().await;
    let mut event = Published::new("ci40003");
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();

    event.updated = UPDATED_MS + 60_000;
    harness.publish(&event).await;
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.updated, 1);

    assert_eq!(
        transitions(&harness, "ci40003").await,
        vec![Transition::New, Transition::Updated]
    );
    assert_eq!(harness.archives("ci40003"), vec!["archive_20231114.zip"]);

    let id = EventId::new("ci40003");
    let archived = archive_entries(&harness, "ci40003", "archive_20231114.zip");
    assert!(archived.contains(&EPICENTER_FILE.to_owned()));
    assert!(archived.contains(&"mi.shp".to_owned()));
    assert!(archived.contains(&export_file_name(GRANULARITY, &id)));

    // Both versions' cells are kept by default.
    assert_eq!(cell_count(&harness, "ci40003").await, 8);
    assert!(harness.event_files("ci40003").contains(&EPICENTER_FILE.to_owned()));
}

#[tokio::test]
async fn status_change_alone_is_an_update() {
    let harness = Harness::new().await;
    let mut event = Published::new("ci40004");
    event.status = "automatic".to_owned();
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();

    event.status = "reviewed".to_owned();
    harness.publish(&event).await;
    let summary = harness.pipeline.run_once().await.unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(harness.archives("ci40004"), vec!["archive_20231114.zip"]);
    // Same `updated`, so the cells collide on their key.
    assert_eq!(cell_count(&harness, "ci40004").await, 4);
}

#[tokio::test]
async fn same_day_updates_get_distinct_archive_labels() {
    let harness = Harness::new().await;
    let mut event = Published::new("ci40005");
    for offset in [0, 60_000, 120_000] {
        event.updated = UPDATED_MS + offset;
        harness.publish(&event).await;
        harness.pipeline.run_once().await.unwrap();
    }

    assert_eq!(
        harness.archives("ci40005"),
        vec!["archive_20231114.zip", "archive_20231114_1.zip"]
    );
    assert_eq!(
        transitions(&harness, "ci40005").await,
        vec![Transition::New, Transition::Updated, Transition::Updated]
    );
}

#[tokio::test]
async fn purge_keeps_only_the_latest_version() {
    let harness = Harness::with_settings(|settings| settings.purge_superseded_cells = true).await;
    let mut event = Published::new("ci40006");
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();

    event.updated = UPDATED_MS + 60_000;
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();

    assert_eq!(cell_count(&harness, "ci40006").await, 4);
}

// =============================================================================
// Filters
// =============================================================================

#[tokio::test]
async fn filtered_events_leave_no_trace() {
    let harness = Harness::new().await;

    let mut small = Published::new("small");
    small.mag = 3.1;
    let mut abroad = Published::new("abroad");
    abroad.longitude = 10.0;
    let mut bare = Published::new("bare");
    bare.with_product = false;

    for event in [&small, &abroad, &bare] {
        harness
            .serve_archive(&event.id, hazard_archive(&HazardDataset::PROCESSING_ORDER))
            .await;
    }
    harness.publish_feed(&[small, abroad, bare]).await;

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.evaluated, 0);

    for id in ["small", "abroad", "bare"] {
        assert!(transitions(&harness, id).await.is_empty(), "{id} was logged");
        assert_eq!(cell_count(&harness, id).await, 0);
        assert!(harness.event_files(id).is_empty());
    }
}

// =============================================================================
// Failures and resumption
// =============================================================================

#[tokio::test]
async fn missing_layer_leaves_ledger_untouched_and_next_poll_resumes() {
    let harness = Harness::new().await;
    let event = Published::new("ci40007");
    harness.publish_feed(std::slice::from_ref(&event)).await;
    harness
        .serve_archive(
            "ci40007",
            hazard_archive(&[HazardDataset::Intensity, HazardDataset::Acceleration]),
        )
        .await;

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(transitions(&harness, "ci40007").await.is_empty());
    assert_eq!(cell_count(&harness, "ci40007").await, 0);

    harness.publish(&event).await;
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.new, 1);
    assert_eq!(transitions(&harness, "ci40007").await, vec![Transition::New]);
}

#[tokio::test]
async fn download_failure_leaves_ledger_untouched() {
    let harness = Harness::new().await;
    harness
        .publish_feed(&[Published::new("ci40008"), Published::new("ci40009")])
        .await;
    harness
        .serve_archive("ci40009", hazard_archive(&HazardDataset::PROCESSING_ORDER))
        .await;

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new, 1);

    assert!(transitions(&harness, "ci40008").await.is_empty());
    assert!(harness.event_files("ci40008").is_empty());
    assert_eq!(transitions(&harness, "ci40009").await, vec![Transition::New]);
}

#[tokio::test]
async fn missing_feed_fails_the_poll() {
    let harness = Harness::new().await;
    harness.fetcher.remove(common::FEED_URL).await;
    assert!(harness.pipeline.run_once().await.is_err());
}

#[tokio::test]
async fn archive_failure_leaves_previous_version_in_place() {
    let harness = Harness::new().await;
    let mut event = Published::new("ci40010");
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();
    let before = harness.event_files("ci40010");

    // A directory in the way of the temporary zip fails the write.
    let blocker = harness.event_dir("ci40010").join(".archive_20231114.zip.tmp");
    std::fs::create_dir(&blocker).unwrap();

    event.updated = UPDATED_MS + 60_000;
    harness.publish(&event).await;
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 0);

    assert_eq!(transitions(&harness, "ci40010").await, vec![Transition::New]);
    assert!(harness.archives("ci40010").is_empty());
    for name in &before {
        assert!(harness.event_files("ci40010").contains(name), "{name} was removed");
    }
    assert_eq!(cell_count(&harness, "ci40010").await, 4);

    std::fs::remove_dir(&blocker).unwrap();
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(harness.archives("ci40010"), vec!["archive_20231114.zip"]);
    assert_eq!(
        transitions(&harness, "ci40010").await,
        vec![Transition::New, Transition::Updated]
    );
}

#[tokio::test]
async fn retried_update_does_not_archive_its_own_files() {
    let harness = Harness::new().await;
    let mut event = Published::new("ci40011");
    harness.publish(&event).await;
    harness.pipeline.run_once().await.unwrap();

    event.updated = UPDATED_MS + 60_000;
    harness.publish_feed(std::slice::from_ref(&event)).await;
    harness
        .serve_archive("ci40011", hazard_archive(&[HazardDataset::Intensity]))
        .await;
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(harness.archives("ci40011"), vec!["archive_20231114.zip"]);

    harness.publish(&event).await;
    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(harness.archives("ci40011"), vec!["archive_20231114.zip"]);
    assert_eq!(
        transitions(&harness, "ci40011").await,
        vec![Transition::New, Transition::Updated]
    );

    let id = EventId::new("ci40011");
    let archived = archive_entries(&harness, "ci40011", "archive_20231114.zip");
    assert!(archived.contains(&export_file_name(GRANULARITY, &id)));
}

// =============================================================================
// Strategies and concurrency
// =============================================================================

#[tokio::test]
async fn intensity_spine_drops_units_without_intensity() {
    let harness = Harness::new().await;
    harness.publish(&Published::new("ci40010")).await;
    harness.pipeline.run_once().await.unwrap();

    let units: Vec<UnitId> = harness
        .store
        .exposure_records(&EventId::new("ci40010"), GRANULARITY)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.unit_id)
        .collect();
    assert_eq!(units, vec![UnitId::new(SHAKEN_TRACT)]);
}

#[tokio::test]
async fn union_strategy_keeps_acceleration_only_units() {
    let harness =
        Harness::with_settings(|settings| settings.merge_strategy = MergeStrategy::UnionOfUnits)
            .await;
    harness.publish(&Published::new("ci40011")).await;
    harness.pipeline.run_once().await.unwrap();

    let exposure = harness
        .store
        .exposure_records(&EventId::new("ci40011"), GRANULARITY)
        .await
        .unwrap();
    let pga_only = exposure
        .iter()
        .find(|record| record.unit_id == UnitId::new(PGA_ONLY_TRACT))
        .unwrap();
    assert!(pga_only.intensity.is_none());
    assert_eq!(pga_only.severity_class, None);
    assert!(pga_only.acceleration.is_some());
    assert_eq!(exposure.len(), 2);
}

#[tokio::test]
async fn concurrent_events_are_each_ingested_once() {
    let harness = Harness::with_settings(|settings| settings.max_concurrent_events = 4).await;
    let events: Vec<Published> = (0..6)
        .map(|n| Published::new(&format!("ci5000{n}")))
        .collect();
    for event in &events {
        harness
            .serve_archive(&event.id, hazard_archive(&HazardDataset::PROCESSING_ORDER))
            .await;
    }
    harness.publish_feed(&events).await;

    let summary = harness.pipeline.run_once().await.unwrap();
    assert_eq!(summary.new, 6);
    for event in &events {
        assert_eq!(transitions(&harness, &event.id).await, vec![Transition::New]);
        assert_eq!(cell_count(&harness, &event.id).await, 4);
    }
}
