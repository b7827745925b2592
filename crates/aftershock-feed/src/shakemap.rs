//! ShakeMap archive decoding.
//!
//! A ShakeMap shapefile bundle is a zip holding one polygon shapefile per
//! hazard layer (`mi`, `pga`, `pgv`). Every record carries the contour
//! value in its numeric `PARAMVALUE` attribute.

use std::io::Cursor;
use std::path::Path;

use aftershock_types::{CellKey, EventId, HazardCell, HazardDataset};
use chrono::{DateTime, Utc};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape};

use crate::error::FeedError;

/// Attribute holding the contour value of each record.
pub const PARAM_VALUE_FIELD: &str = "PARAMVALUE";

/// Extract a zipped archive into `dir`, creating it if needed.
///
/// Entry names that would escape `dir` are rejected by the zip reader.
/// Returns the number of entries extracted.
///
/// # Errors
///
/// Returns [`FeedError::Archive`] if the bytes are not a valid zip and
/// [`FeedError::Io`] if the directory cannot be written.
pub fn extract_archive(bytes: &[u8], dir: &Path) -> Result<usize, FeedError> {
    std::fs::create_dir_all(dir)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let entries = archive.len();
    archive.extract(dir)?;
    tracing::debug!(dir = %dir.display(), entries, "Extracted ShakeMap archive");
    Ok(entries)
}

/// Cells decoded from one hazard layer.
#[derive(Debug, Clone)]
pub struct LayerLoad {
    /// Layer the cells belong to.
    pub dataset: HazardDataset,
    /// Decoded cells in file order.
    pub cells: Vec<HazardCell>,
    /// Records skipped for a missing value or unusable geometry.
    pub skipped: usize,
}

/// Decode all three hazard layers of an extracted archive.
///
/// Layers are returned in processing order.
///
/// # Errors
///
/// Returns [`FeedError::MissingLayer`] if a layer file is absent and
/// [`FeedError::Shapefile`] if one cannot be opened.
pub fn read_hazard_layers(
    dir: &Path,
    event_id: &EventId,
    updated: DateTime<Utc>,
) -> Result<Vec<LayerLoad>, FeedError> {
    HazardDataset::PROCESSING_ORDER
        .into_iter()
        .map(|dataset| read_layer(dir, event_id, updated, dataset))
        .collect()
}

/// Decode one hazard layer.
///
/// A record with an unusable shape or value is skipped with a warning;
/// the rest of the layer is still read.
///
/// # Errors
///
/// Returns [`FeedError::MissingLayer`] if the layer file is absent and
/// [`FeedError::Shapefile`] if it cannot be opened.
pub fn read_layer(
    dir: &Path,
    event_id: &EventId,
    updated: DateTime<Utc>,
    dataset: HazardDataset,
) -> Result<LayerLoad, FeedError> {
    let path = dir.join(dataset.shapefile_name());
    if !path.is_file() {
        return Err(FeedError::MissingLayer(dataset.layer_name().to_owned()));
    }

    let mut reader = shapefile::Reader::from_path(&path).map_err(|e| FeedError::Shapefile {
        layer: dataset.layer_name().to_owned(),
        message: e.to_string(),
    })?;

    let mut load = LayerLoad {
        dataset,
        cells: Vec::new(),
        skipped: 0,
    };

    for (index, item) in reader.iter_shapes_and_records().enumerate() {
        let decoded = item
            .map_err(|e| e.to_string())
            .and_then(|(shape, record)| {
                let value = param_value(record.get(PARAM_VALUE_FIELD))
                    .ok_or_else(|| format!("no numeric {PARAM_VALUE_FIELD}"))?;
                let geometry = shape_to_multipolygon(&shape)?;
                Ok((value, geometry))
            });

        match decoded {
            Ok((param_value, geometry)) => load.cells.push(HazardCell {
                key: CellKey {
                    event_id: event_id.clone(),
                    updated,
                    dataset,
                    param_value,
                },
                geometry,
            }),
            Err(reason) => {
                load.skipped = load.skipped.saturating_add(1);
                tracing::warn!(
                    event_id = %event_id,
                    layer = dataset.layer_name(),
                    record = index,
                    reason = %reason,
                    "Skipped hazard record"
                );
            }
        }
    }

    tracing::debug!(
        event_id = %event_id,
        layer = dataset.layer_name(),
        cells = load.cells.len(),
        skipped = load.skipped,
        "Decoded hazard layer"
    );
    Ok(load)
}

/// Read a numeric attribute regardless of its dBase field type.
fn param_value(field: Option<&FieldValue>) -> Option<f64> {
    let value = match field? {
        FieldValue::Numeric(value) => *value,
        FieldValue::Float(value) => value.map(f64::from),
        FieldValue::Double(value) => Some(*value),
        FieldValue::Integer(value) => Some(f64::from(*value)),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// Convert a polygon shape to a multipolygon.
///
/// Each outer ring starts a new polygon; inner rings become holes of the
/// most recent outer ring.
fn shape_to_multipolygon(shape: &Shape) -> Result<MultiPolygon<f64>, String> {
    let Shape::Polygon(polygon) = shape else {
        return Err(format!("expected a polygon shape, found {:?}", shape.shapetype()));
    };

    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for ring in polygon.rings() {
        let line: LineString<f64> = ring
            .points()
            .iter()
            .map(|p| Coord { x: p.x, y: p.y })
            .collect();
        match ring {
            PolygonRing::Outer(_) => polygons.push(Polygon::new(line, Vec::new())),
            PolygonRing::Inner(_) => {
                let outer = polygons
                    .last_mut()
                    .ok_or_else(|| "inner ring before any outer ring".to_owned())?;
                outer.interiors_push(line);
            }
        }
    }

    if polygons.is_empty() {
        return Err("polygon without rings".to_owned());
    }
    Ok(MultiPolygon(polygons))
}
