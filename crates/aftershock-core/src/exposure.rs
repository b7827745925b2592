//! Spatial exposure aggregation and export.
//!
//! For one event version and one granularity, each hazard layer is
//! aggregated onto geography units by the store, then the three per-layer
//! tables are merged into one [`ExposureRecord`] per unit, persisted, and
//! exported as JSON lines next to the event's other artifacts.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use aftershock_db::GeometryStore;
use aftershock_types::{
    EventId, ExposureRecord, HazardDataset, HazardStats, LayerExposure, UnitId, severity_class,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExposureError;

/// How per-layer tables are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Units come from the intensity layer only; acceleration and velocity
    /// are left-joined onto it.
    #[default]
    IntensitySpine,
    /// Units touched by any layer are kept.
    UnionOfUnits,
}

/// Merge per-layer statistics into exposure records, ordered by unit id.
///
/// `layers` may arrive in any order; the representative geometry of a
/// unit is taken from the first layer (in processing order) that has it.
pub fn merge_layers(
    event_id: &EventId,
    granularity: &str,
    mut layers: Vec<(HazardDataset, Vec<LayerExposure>)>,
    strategy: MergeStrategy,
) -> Vec<ExposureRecord> {
    layers.sort_by_key(|(dataset, _)| *dataset);
    let mut merged: BTreeMap<UnitId, ExposureRecord> = BTreeMap::new();

    for (dataset, rows) in layers {
        let opens_units = match strategy {
            MergeStrategy::IntensitySpine => dataset == HazardDataset::Intensity,
            MergeStrategy::UnionOfUnits => true,
        };

        for row in rows {
            match merged.get_mut(&row.unit_id) {
                Some(record) => *record.stats_mut(dataset) = Some(row.stats),
                None if opens_units => {
                    let mut record = ExposureRecord {
                        unit_id: row.unit_id.clone(),
                        event_id: event_id.clone(),
                        granularity: granularity.to_owned(),
                        intensity: None,
                        acceleration: None,
                        velocity: None,
                        severity_class: None,
                        geometry_wkt: row.geometry_wkt,
                    };
                    *record.stats_mut(dataset) = Some(row.stats);
                    merged.insert(row.unit_id, record);
                }
                None => {}
            }
        }
    }

    merged
        .into_values()
        .map(|mut record| {
            record.severity_class = record.intensity.and_then(|s| severity_class(s.max));
            record
        })
        .collect()
}

/// Result of aggregating one granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRun {
    /// Granularity aggregated.
    pub granularity: String,
    /// Records persisted.
    pub units: usize,
    /// Export file written.
    pub export_path: PathBuf,
}

/// Aggregates hazard layers onto geography through the store.
#[derive(Debug, Clone)]
pub struct ExposureAggregator {
    store: GeometryStore,
    strategy: MergeStrategy,
}

impl ExposureAggregator {
    /// Create an aggregator.
    pub const fn new(store: GeometryStore, strategy: MergeStrategy) -> Self {
        Self { store, strategy }
    }

    /// Compute exposure records for one event version at one granularity.
    ///
    /// # Errors
    ///
    /// Returns [`ExposureError::Store`] if a layer query fails.
    pub async fn aggregate(
        &self,
        event_id: &EventId,
        updated: DateTime<Utc>,
        granularity: &str,
    ) -> Result<Vec<ExposureRecord>, ExposureError> {
        let mut layers = Vec::with_capacity(HazardDataset::PROCESSING_ORDER.len());
        for dataset in HazardDataset::PROCESSING_ORDER {
            let rows = self
                .store
                .layer_exposure(event_id, updated, dataset, granularity)
                .await?;
            tracing::debug!(
                event_id = %event_id,
                dataset = %dataset,
                granularity,
                units = rows.len(),
                "Layer aggregated"
            );
            layers.push((dataset, rows));
        }
        Ok(merge_layers(event_id, granularity, layers, self.strategy))
    }

    /// Aggregate, replace stored records and export to `event_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExposureError`] if aggregation, persistence or export
    /// fails.
    pub async fn run(
        &self,
        event_id: &EventId,
        updated: DateTime<Utc>,
        granularity: &str,
        event_dir: &Path,
    ) -> Result<ExposureRun, ExposureError> {
        let records = self.aggregate(event_id, updated, granularity).await?;
        self.store
            .replace_exposure(event_id, granularity, &records)
            .await?;

        let export_path = event_dir.join(export_file_name(granularity, event_id));
        export_jsonl(&export_path, &records)?;

        tracing::info!(
            event_id = %event_id,
            granularity,
            units = records.len(),
            export = %export_path.display(),
            "Exposure computed"
        );
        Ok(ExposureRun {
            granularity: granularity.to_owned(),
            units: records.len(),
            export_path,
        })
    }
}

/// Export file name for one event and granularity.
pub fn export_file_name(granularity: &str, event_id: &EventId) -> String {
    format!("{granularity}_{event_id}.jsonl")
}

/// One exported line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLine {
    /// Geography unit.
    pub unit_id: String,
    /// Event.
    pub event_id: String,
    /// Maximum intensity.
    pub mmi_max: Option<f64>,
    /// Minimum intensity.
    pub mmi_min: Option<f64>,
    /// Mean intensity.
    pub mmi_avg: Option<f64>,
    /// Maximum acceleration.
    pub pga_max: Option<f64>,
    /// Minimum acceleration.
    pub pga_min: Option<f64>,
    /// Mean acceleration.
    pub pga_avg: Option<f64>,
    /// Maximum velocity.
    pub pgv_max: Option<f64>,
    /// Minimum velocity.
    pub pgv_min: Option<f64>,
    /// Mean velocity.
    pub pgv_avg: Option<f64>,
    /// Severity class.
    pub mmi_int: Option<i32>,
    /// Unit geometry as WKT.
    pub geometry: String,
}

impl From<&ExposureRecord> for ExportLine {
    fn from(record: &ExposureRecord) -> Self {
        let split = |stats: Option<HazardStats>| {
            stats.map_or((None, None, None), |s| (Some(s.max), Some(s.min), Some(s.avg)))
        };
        let (mmi_max, mmi_min, mmi_avg) = split(record.intensity);
        let (pga_max, pga_min, pga_avg) = split(record.acceleration);
        let (pgv_max, pgv_min, pgv_avg) = split(record.velocity);

        Self {
            unit_id: record.unit_id.as_str().to_owned(),
            event_id: record.event_id.as_str().to_owned(),
            mmi_max,
            mmi_min,
            mmi_avg,
            pga_max,
            pga_min,
            pga_avg,
            pgv_max,
            pgv_min,
            pgv_avg,
            mmi_int: record.severity_class,
            geometry: record.geometry_wkt.clone(),
        }
    }
}

/// Write records as JSON lines to `path`, atomically.
///
/// # Errors
///
/// Returns [`ExposureError::Io`] if the file cannot be written and
/// [`ExposureError::Serialize`] if a record cannot be encoded.
pub fn export_jsonl(path: &Path, records: &[ExposureRecord]) -> Result<(), ExposureError> {
    let io_error = |source| ExposureError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let file = File::create(&tmp_path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, &ExportLine::from(record))?;
        writer.write_all(b"\n").map_err(io_error)?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| io_error(e.into_error()))?;
    file.sync_all().map_err(io_error)?;
    fs::rename(&tmp_path, path).map_err(io_error)?;
    Ok(())
}
