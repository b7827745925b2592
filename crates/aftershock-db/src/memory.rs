//! In-memory geometry store.
//!
//! Mirrors the `PostGIS` tables with ordered maps behind a single
//! [`tokio::sync::RwLock`] and evaluates spatial predicates with [`geo`].
//! Used for tests and for running the pipeline without a database; the
//! state is lost when the process exits.
//!
//! Cloning a [`MemoryStore`] yields another handle to the same tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use aftershock_types::{
    CellIndex, Event, EventId, ExposureRecord, GeographyUnit, HazardCell, HazardDataset,
    HazardStats, InsertSummary, LayerExposure, StatusLogEntry, UnitId,
};
use chrono::{DateTime, Utc};
use geo::{BoundingRect, Intersects};
use geo_types::MultiPolygon;
use tokio::sync::RwLock;
use wkt::ToWkt;

/// Table contents.
#[derive(Debug, Default)]
struct Tables {
    status_log: Vec<StatusLogEntry>,
    events: BTreeMap<(EventId, DateTime<Utc>), Event>,
    hazard_cells: BTreeMap<CellIndex, MultiPolygon<f64>>,
    geography: BTreeMap<(String, UnitId), MultiPolygon<f64>>,
    exposure: BTreeMap<(String, EventId, UnitId), ExposureRecord>,
}

/// Shared handle to the in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

fn count_of(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Status ledger
    // =========================================================================

    /// The most recent ledger entry for an event.
    pub async fn last_status(&self, event_id: &EventId) -> Option<StatusLogEntry> {
        let tables = self.tables.read().await;
        tables
            .status_log
            .iter()
            .rev()
            .find(|entry| entry.event_id == *event_id)
            .cloned()
    }

    /// Append one ledger entry.
    pub async fn append_status(&self, entry: StatusLogEntry) {
        self.tables.write().await.status_log.push(entry);
    }

    /// Every ledger entry for an event, oldest first.
    pub async fn status_history(&self, event_id: &EventId) -> Vec<StatusLogEntry> {
        let tables = self.tables.read().await;
        tables
            .status_log
            .iter()
            .filter(|entry| entry.event_id == *event_id)
            .cloned()
            .collect()
    }

    // =========================================================================
    // Event metadata
    // =========================================================================

    /// Record one event version. Returns `false` if it was already present.
    pub async fn record_event(&self, event: &Event) -> bool {
        let mut tables = self.tables.write().await;
        let key = (event.id.clone(), event.updated);
        if tables.events.contains_key(&key) {
            return false;
        }
        tables.events.insert(key, event.clone());
        true
    }

    // =========================================================================
    // Hazard cells
    // =========================================================================

    /// Insert cells, skipping keys that are already stored.
    pub async fn insert_hazard_cells(&self, cells: &[HazardCell]) -> InsertSummary {
        let mut tables = self.tables.write().await;
        let mut summary = InsertSummary::default();
        for cell in cells {
            let index = cell.key.index();
            if tables.hazard_cells.contains_key(&index) {
                summary.duplicates = summary.duplicates.saturating_add(1);
            } else {
                tables.hazard_cells.insert(index, cell.geometry.clone());
                summary.inserted = summary.inserted.saturating_add(1);
            }
        }
        summary
    }

    /// Number of stored cells for an event, optionally for one layer only.
    pub async fn hazard_cell_count(&self, event_id: &EventId, dataset: Option<HazardDataset>) -> u64 {
        let tables = self.tables.read().await;
        count_of(
            tables
                .hazard_cells
                .keys()
                .filter(|k| k.event_id == *event_id && dataset.is_none_or(|d| k.dataset == d))
                .count(),
        )
    }

    /// Delete every cell of an event not belonging to version `keep`.
    pub async fn purge_superseded_cells(&self, event_id: &EventId, keep: DateTime<Utc>) -> u64 {
        let mut tables = self.tables.write().await;
        let before = tables.hazard_cells.len();
        tables
            .hazard_cells
            .retain(|k, _| k.event_id != *event_id || k.updated == keep);
        count_of(before.saturating_sub(tables.hazard_cells.len()))
    }

    // =========================================================================
    // Geography
    // =========================================================================

    /// Insert or replace geography units.
    pub async fn upsert_geography_units(&self, units: &[GeographyUnit]) -> u64 {
        let mut tables = self.tables.write().await;
        for unit in units {
            tables.geography.insert(
                (unit.granularity.clone(), unit.unit_id.clone()),
                unit.geometry.clone(),
            );
        }
        count_of(units.len())
    }

    /// Number of stored units of one granularity.
    pub async fn geography_unit_count(&self, granularity: &str) -> u64 {
        let tables = self.tables.read().await;
        count_of(
            tables
                .geography
                .keys()
                .filter(|(g, _)| g == granularity)
                .count(),
        )
    }

    /// Per-unit statistics of one hazard layer of one event version.
    ///
    /// Same three steps as the `PostGIS` query: the coverage extent is the
    /// collection of the layer's cell polygons (intersecting a collection
    /// is equivalent to intersecting its union), candidates are the units
    /// of the granularity touching it, and every candidate is reduced over
    /// the cells it touches.
    pub async fn layer_exposure(
        &self,
        event_id: &EventId,
        updated: DateTime<Utc>,
        dataset: HazardDataset,
        granularity: &str,
    ) -> Vec<LayerExposure> {
        let tables = self.tables.read().await;

        let cells: Vec<(f64, &MultiPolygon<f64>)> = tables
            .hazard_cells
            .iter()
            .filter(|(k, _)| k.event_id == *event_id && k.updated == updated && k.dataset == dataset)
            .map(|(k, geometry)| (k.param_value(), geometry))
            .collect();

        let coverage: MultiPolygon<f64> = cells
            .iter()
            .flat_map(|(_, geometry)| geometry.0.iter().cloned())
            .collect();
        let Some(extent) = coverage.bounding_rect() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for ((_, unit_id), unit_geometry) in tables
            .geography
            .iter()
            .filter(|((g, _), _)| g == granularity)
        {
            let touches_extent = unit_geometry
                .bounding_rect()
                .is_some_and(|rect| rect.intersects(&extent));
            if !touches_extent || !unit_geometry.intersects(&coverage) {
                continue;
            }

            let values: Vec<f64> = cells
                .iter()
                .filter(|(_, cell)| unit_geometry.intersects(*cell))
                .map(|(value, _)| *value)
                .collect();

            if let Some(stats) = HazardStats::from_values(&values) {
                out.push(LayerExposure {
                    unit_id: unit_id.clone(),
                    geometry_wkt: unit_geometry.wkt_string(),
                    stats,
                });
            }
        }
        out
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    /// Replace every record of `event_id` at `granularity`.
    pub async fn replace_exposure(
        &self,
        event_id: &EventId,
        granularity: &str,
        records: &[ExposureRecord],
    ) {
        let mut tables = self.tables.write().await;
        tables
            .exposure
            .retain(|(g, e, _), _| g != granularity || e != event_id);
        for record in records {
            tables.exposure.insert(
                (
                    granularity.to_owned(),
                    event_id.clone(),
                    record.unit_id.clone(),
                ),
                record.clone(),
            );
        }
    }

    /// All records of an event at one granularity, ordered by unit id.
    pub async fn exposure_records(&self, event_id: &EventId, granularity: &str) -> Vec<ExposureRecord> {
        let tables = self.tables.read().await;
        tables
            .exposure
            .iter()
            .filter(|((g, e, _), _)| g == granularity && e == event_id)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use aftershock_types::{CellKey, RunId, Transition};
    use geo_types::{MultiPolygon, polygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn cell(updated: DateTime<Utc>, dataset: HazardDataset, value: f64, geometry: MultiPolygon<f64>) -> HazardCell {
        HazardCell {
            key: CellKey {
                event_id: EventId::new("ev1"),
                updated,
                dataset,
                param_value: value,
            },
            geometry,
        }
    }

    fn unit(id: &str, geometry: MultiPolygon<f64>) -> GeographyUnit {
        GeographyUnit {
            unit_id: UnitId::new(id),
            granularity: "tracts".to_owned(),
            geometry,
        }
    }

    #[tokio::test]
    async fn duplicate_cells_are_counted_not_rejected() {
        let store = MemoryStore::new();
        let cells = vec![
            cell(at(1), HazardDataset::Intensity, 4.0, square(0.0, 0.0, 1.0)),
            cell(at(1), HazardDataset::Intensity, 5.0, square(0.0, 0.0, 0.5)),
        ];

        let first = store.insert_hazard_cells(&cells).await;
        assert_eq!(first, InsertSummary { inserted: 2, duplicates: 0 });

        let second = store.insert_hazard_cells(&cells).await;
        assert_eq!(second, InsertSummary { inserted: 0, duplicates: 2 });
        assert_eq!(store.hazard_cell_count(&EventId::new("ev1"), None).await, 2);
    }

    #[tokio::test]
    async fn last_status_is_most_recent_append() {
        let store = MemoryStore::new();
        let id = EventId::new("ev1");
        for (updated, transition) in [(at(1), Transition::New), (at(2), Transition::Updated)] {
            store
                .append_status(StatusLogEntry {
                    event_id: id.clone(),
                    status: "reviewed".to_owned(),
                    updated,
                    transition,
                    observed_at: Utc::now(),
                    run_id: RunId::new(),
                })
                .await;
        }

        let last = store.last_status(&id).await.unwrap();
        assert_eq!(last.updated, at(2));
        assert_eq!(store.status_history(&id).await.len(), 2);
        assert!(store.last_status(&EventId::new("other")).await.is_none());
    }

    #[tokio::test]
    async fn layer_exposure_reduces_intersecting_cells() {
        let store = MemoryStore::new();
        // Nested contours: the 4.0 band covers [0,2]^2, the 5.0 band [0,1]^2.
        store
            .insert_hazard_cells(&[
                cell(at(1), HazardDataset::Intensity, 4.0, square(0.0, 0.0, 2.0)),
                cell(at(1), HazardDataset::Intensity, 5.0, square(0.0, 0.0, 1.0)),
            ])
            .await;
        store
            .upsert_geography_units(&[
                unit("A", square(0.2, 0.2, 0.3)),
                unit("B", square(1.5, 1.5, 0.3)),
                unit("C", square(10.0, 10.0, 1.0)),
            ])
            .await;

        let rows = store
            .layer_exposure(&EventId::new("ev1"), at(1), HazardDataset::Intensity, "tracts")
            .await;

        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.unit_id.as_str() == "A").unwrap();
        assert_eq!(a.stats.max, 5.0);
        assert_eq!(a.stats.min, 4.0);
        assert_eq!(a.stats.avg, 4.5);
        assert!(a.geometry_wkt.starts_with("MULTIPOLYGON"));

        let b = rows.iter().find(|r| r.unit_id.as_str() == "B").unwrap();
        assert_eq!(b.stats.max, 4.0);
        assert_eq!(b.stats.min, 4.0);
    }

    #[tokio::test]
    async fn layer_exposure_is_scoped_to_one_version() {
        let store = MemoryStore::new();
        store
            .insert_hazard_cells(&[
                cell(at(1), HazardDataset::Intensity, 4.0, square(0.0, 0.0, 1.0)),
                cell(at(2), HazardDataset::Intensity, 7.0, square(0.0, 0.0, 1.0)),
            ])
            .await;
        store.upsert_geography_units(&[unit("A", square(0.2, 0.2, 0.3))]).await;

        let rows = store
            .layer_exposure(&EventId::new("ev1"), at(2), HazardDataset::Intensity, "tracts")
            .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.first().unwrap().stats.max, 7.0);

        let none = store
            .layer_exposure(&EventId::new("ev1"), at(3), HazardDataset::Intensity, "tracts")
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn purge_keeps_only_the_given_version() {
        let store = MemoryStore::new();
        store
            .insert_hazard_cells(&[
                cell(at(1), HazardDataset::Intensity, 4.0, square(0.0, 0.0, 1.0)),
                cell(at(2), HazardDataset::Intensity, 4.0, square(0.0, 0.0, 1.0)),
                cell(at(2), HazardDataset::Velocity, 1.0, square(0.0, 0.0, 1.0)),
            ])
            .await;

        let purged = store.purge_superseded_cells(&EventId::new("ev1"), at(2)).await;
        assert_eq!(purged, 1);
        assert_eq!(store.hazard_cell_count(&EventId::new("ev1"), None).await, 2);
        assert_eq!(
            store
                .hazard_cell_count(&EventId::new("ev1"), Some(HazardDataset::Velocity))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn replace_exposure_drops_stale_units() {
        let store = MemoryStore::new();
        let id = EventId::new("ev1");
        let record = |unit: &str| ExposureRecord {
            unit_id: UnitId::new(unit),
            event_id: id.clone(),
            granularity: "tracts".to_owned(),
            intensity: None,
            acceleration: None,
            velocity: None,
            severity_class: None,
            geometry_wkt: "MULTIPOLYGON EMPTY".to_owned(),
        };

        store.replace_exposure(&id, "tracts", &[record("A"), record("B")]).await;
        store.replace_exposure(&id, "tracts", &[record("C")]).await;

        let stored = store.exposure_records(&id, "tracts").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.first().unwrap().unit_id.as_str(), "C");
    }
}
