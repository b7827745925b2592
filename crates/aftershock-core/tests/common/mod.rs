//! Shared fixtures for pipeline tests: a fake feed, hazard archives built
//! on the fly and a memory-backed pipeline.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::arithmetic_side_effects
)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use aftershock_core::{Pipeline, PipelineSettings};
use aftershock_db::{GeometryStore, MemoryStore};
use aftershock_feed::{FeedPoller, Fetcher, PollerConfig, StaticFetcher};
use aftershock_types::{GeographyUnit, HazardDataset, UnitId};
use geo_types::{MultiPolygon, Polygon, polygon};
use serde_json::{Value, json};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, PolygonRing};
use tempfile::TempDir;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Summary feed URL served by the fake fetcher.
pub const FEED_URL: &str = "https://feed.test/significant_week.geojson";

/// First revision time: 2023-11-14T22:13:20Z.
pub const UPDATED_MS: i64 = 1_700_000_000_000;

/// Granularity the fixtures load.
pub const GRANULARITY: &str = "tracts";

/// Axis-aligned box `[west, south, east, north]`.
pub type Bounds = [f64; 4];

/// Intensity contours: two overlapping cells.
pub const MI_CELLS: &[(f64, Bounds)] = &[
    (4.5, [-118.0, 34.0, -116.0, 36.0]),
    (5.0, [-117.5, 34.5, -116.5, 35.5]),
];

/// Acceleration contours: one wide cell reaching east of the intensity cells.
pub const PGA_CELLS: &[(f64, Bounds)] = &[(0.12, [-118.0, 34.0, -114.0, 36.0])];

/// Velocity contours.
pub const PGV_CELLS: &[(f64, Bounds)] = &[(3.0, [-118.0, 34.0, -116.0, 36.0])];

/// Tract covered by intensity, acceleration and velocity.
pub const SHAKEN_TRACT: &str = "06037000100";

/// Tract covered by acceleration only.
pub const PGA_ONLY_TRACT: &str = "06071000200";

/// Tract far from every cell.
pub const QUIET_TRACT: &str = "08031000300";

fn ring(bounds: Bounds) -> Vec<Point> {
    let [west, south, east, north] = bounds;
    vec![
        Point::new(west, south),
        Point::new(west, north),
        Point::new(east, north),
        Point::new(east, south),
        Point::new(west, south),
    ]
}

fn geo_box(bounds: Bounds) -> MultiPolygon<f64> {
    let [west, south, east, north] = bounds;
    let square: Polygon<f64> = polygon![
        (x: west, y: south),
        (x: east, y: south),
        (x: east, y: north),
        (x: west, y: north),
        (x: west, y: south),
    ];
    MultiPolygon(vec![square])
}

/// Write one layer's `.shp`/`.shx`/`.dbf` into `dir`.
pub fn write_layer(dir: &Path, dataset: HazardDataset, cells: &[(f64, Bounds)]) {
    let table = TableWriterBuilder::new().add_numeric_field(
        FieldName::try_from("PARAMVALUE").expect("field name"),
        10,
        3,
    );
    let mut writer =
        shapefile::Writer::from_path(dir.join(dataset.shapefile_name()), table).expect("writer");
    for &(value, bounds) in cells {
        let shape = shapefile::Polygon::with_rings(vec![PolygonRing::Outer(ring(bounds))]);
        let mut record = Record::default();
        record.insert("PARAMVALUE".to_owned(), FieldValue::Numeric(Some(value)));
        writer.write_shape_and_record(&shape, &record).expect("write cell");
    }
}

/// Build a zipped hazard archive holding the given layers.
pub fn hazard_archive(layers: &[HazardDataset]) -> Vec<u8> {
    let staging = tempfile::tempdir().expect("staging dir");
    for &dataset in layers {
        let cells = match dataset {
            HazardDataset::Intensity => MI_CELLS,
            HazardDataset::Acceleration => PGA_CELLS,
            HazardDataset::Velocity => PGV_CELLS,
        };
        write_layer(staging.path(), dataset, cells);
    }

    let mut paths: Vec<_> = fs::read_dir(staging.path())
        .expect("list staging")
        .map(|entry| entry.expect("entry").path())
        .collect();
    paths.sort();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for path in paths {
        let name = path.file_name().expect("name").to_string_lossy().into_owned();
        zip.start_file(name, SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(&fs::read(&path).expect("read layer"))
            .expect("write entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

/// A complete archive.
pub fn full_archive() -> Vec<u8> {
    hazard_archive(&HazardDataset::PROCESSING_ORDER)
}

/// Detail document URL of an event.
pub fn detail_url(id: &str) -> String {
    format!("https://feed.test/detail/{id}.geojson")
}

/// Hazard archive URL of an event.
pub fn archive_url(id: &str) -> String {
    format!("https://feed.test/product/{id}/shape.zip")
}

/// How an event is published on the fake feed.
#[derive(Debug, Clone)]
pub struct Published {
    /// Event id.
    pub id: String,
    /// Magnitude.
    pub mag: f64,
    /// Epicenter longitude.
    pub longitude: f64,
    /// Review status.
    pub status: String,
    /// Revision time, epoch milliseconds.
    pub updated: i64,
    /// Whether the detail lists a shakemap product.
    pub with_product: bool,
}

impl Published {
    /// A reviewed M5.6 event near Los Angeles with a product.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            mag: 5.6,
            longitude: -117.2,
            status: "reviewed".to_owned(),
            updated: UPDATED_MS,
            with_product: true,
        }
    }

    fn feature(&self) -> Value {
        json!({
            "type": "Feature",
            "id": self.id,
            "properties": {
                "mag": self.mag,
                "place": "10 km N of Somewhere, CA",
                "time": UPDATED_MS - 3_600_000,
                "updated": self.updated,
                "status": self.status,
                "detail": detail_url(&self.id),
                "title": format!("M {} - 10 km N of Somewhere, CA", self.mag)
            },
            "geometry": { "type": "Point", "coordinates": [self.longitude, 35.0, 8.5] }
        })
    }

    fn detail(&self) -> Value {
        let mut doc = self.feature();
        if self.with_product {
            let products = json!({
                "shakemap": [{
                    "code": self.id,
                    "source": "ci",
                    "status": "UPDATE",
                    "updateTime": self.updated,
                    "contents": {
                        "download/shape.zip": { "url": archive_url(&self.id) }
                    }
                }]
            });
            doc.get_mut("properties")
                .and_then(Value::as_object_mut)
                .expect("properties")
                .insert("products".to_owned(), products);
        }
        doc
    }
}

/// A memory-backed pipeline reading a fake feed.
pub struct Harness {
    /// Fake network.
    pub fetcher: StaticFetcher,
    /// Backing store.
    pub store: GeometryStore,
    /// Pipeline under test.
    pub pipeline: Pipeline,
    /// Root of the event directories.
    pub data: TempDir,
}

impl Harness {
    /// A pipeline with tracts loaded and an empty feed.
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Like [`Harness::new`], adjusting the settings first.
    pub async fn with_settings(adjust: impl FnOnce(&mut PipelineSettings)) -> Self {
        let data = tempfile::tempdir().expect("data dir");
        let fetcher = StaticFetcher::new();
        let store = GeometryStore::Memory(MemoryStore::new());

        let units = [
            (SHAKEN_TRACT, [-117.9, 34.1, -117.1, 34.9]),
            (PGA_ONLY_TRACT, [-115.0, 34.2, -114.5, 34.8]),
            (QUIET_TRACT, [-105.0, 39.5, -104.5, 40.0]),
        ]
        .map(|(id, bounds)| GeographyUnit {
            unit_id: UnitId::new(id),
            granularity: GRANULARITY.to_owned(),
            geometry: geo_box(bounds),
        });
        store.upsert_geography_units(&units).await.expect("units");

        let mut settings = PipelineSettings::new(data.path());
        adjust(&mut settings);

        let poller = FeedPoller::new(
            Fetcher::Static(fetcher.clone()),
            PollerConfig {
                feed_url: FEED_URL.to_owned(),
                ..PollerConfig::default()
            },
        );
        let pipeline = Pipeline::new(poller, store.clone(), settings);

        let harness = Self {
            fetcher,
            store,
            pipeline,
            data,
        };
        harness.publish_feed(&[]).await;
        harness
    }

    /// Replace the feed with `events`, registering their detail documents.
    pub async fn publish_feed(&self, events: &[Published]) {
        let features: Vec<Value> = events.iter().map(Published::feature).collect();
        self.fetcher
            .insert_json(FEED_URL, &json!({ "type": "FeatureCollection", "features": features }))
            .await;
        for event in events {
            self.fetcher
                .insert_json(detail_url(&event.id), &event.detail())
                .await;
        }
    }

    /// Serve `bytes` as the hazard archive of `id`.
    pub async fn serve_archive(&self, id: &str, bytes: Vec<u8>) {
        self.fetcher.insert(archive_url(id), bytes).await;
    }

    /// Publish one event with a complete archive.
    pub async fn publish(&self, event: &Published) {
        self.serve_archive(&event.id, full_archive()).await;
        self.publish_feed(std::slice::from_ref(event)).await;
    }

    /// Directory of one event.
    pub fn event_dir(&self, id: &str) -> std::path::PathBuf {
        self.data.path().join(id)
    }

    /// Sorted file names in an event directory.
    pub fn event_files(&self, id: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.event_dir(id))
            .map(|entries| {
                entries
                    .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Archive names in an event directory.
    pub fn archives(&self, id: &str) -> Vec<String> {
        self.event_files(id)
            .into_iter()
            .filter(|name| name.starts_with("archive_"))
            .collect()
    }
}
