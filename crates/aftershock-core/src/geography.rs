//! Reference geography loading.
//!
//! Geography files are JSON lines, one unit per line:
//!
//! ```text
//! {"unit_id": "06001400100", "wkt": "MULTIPOLYGON(((...)))"}
//! ```
//!
//! Lines that do not decode, or whose WKT is not a polygon or
//! multipolygon, are skipped with a warning. Loading is an upsert, so
//! repeating it at every start-up is harmless.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use aftershock_db::GeometryStore;
use aftershock_types::{GeographyUnit, UnitId};
use geo_types::{Geometry, MultiPolygon};
use serde::Deserialize;
use wkt::TryFromWkt;

use crate::config::GeographySource;
use crate::error::{FailureClass, GeographyError};

#[derive(Debug, Deserialize)]
struct GeographyLine {
    unit_id: String,
    wkt: String,
}

/// Units decoded from one geography file.
#[derive(Debug, Clone, Default)]
pub struct GeographyLoad {
    /// Decoded units.
    pub units: Vec<GeographyUnit>,
    /// Lines skipped.
    pub skipped: usize,
}

/// Decode a WKT string into a multipolygon.
pub fn parse_unit_geometry(wkt: &str) -> Result<MultiPolygon<f64>, String> {
    let geometry = <Geometry<f64> as TryFromWkt<f64>>::try_from_wkt_str(wkt)
        .map_err(|e| e.to_string())?;
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        _ => Err("geometry is not polygonal".to_owned()),
    }
}

/// Decode geography lines for `granularity` from a reader.
///
/// # Errors
///
/// Returns the underlying I/O error if the reader fails.
pub fn parse_geography(reader: impl BufRead, granularity: &str) -> std::io::Result<GeographyLoad> {
    let mut load = GeographyLoad::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let decoded = serde_json::from_str::<GeographyLine>(&line)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                let geometry = parse_unit_geometry(&raw.wkt)?;
                Ok(GeographyUnit {
                    unit_id: UnitId::from(raw.unit_id),
                    granularity: granularity.to_owned(),
                    geometry,
                })
            });

        match decoded {
            Ok(unit) => load.units.push(unit),
            Err(reason) => {
                load.skipped = load.skipped.saturating_add(1);
                tracing::warn!(
                    granularity,
                    line = index.saturating_add(1),
                    class = FailureClass::Geometry.as_str(),
                    reason = %reason,
                    "Skipped geography unit"
                );
            }
        }
    }
    Ok(load)
}

/// Decode a geography file.
///
/// # Errors
///
/// Returns [`GeographyError::Io`] if the file cannot be read.
pub fn read_geography_file(path: &Path, granularity: &str) -> Result<GeographyLoad, GeographyError> {
    let io_error = |source| GeographyError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    parse_geography(BufReader::new(file), granularity).map_err(io_error)
}

/// Load one configured source into the store.
///
/// Returns the number of units written. A source whose file does not
/// exist is skipped with a warning and writes nothing.
///
/// # Errors
///
/// Returns [`GeographyError`] if an existing file cannot be read or the
/// store rejects the units.
pub async fn load_source(
    store: &GeometryStore,
    source: &GeographySource,
) -> Result<u64, GeographyError> {
    if !source.path.exists() {
        tracing::warn!(
            granularity = %source.granularity,
            path = %source.path.display(),
            "Geography file not found, skipping source"
        );
        return Ok(0);
    }
    let load = read_geography_file(&source.path, &source.granularity)?;
    let written = store.upsert_geography_units(&load.units).await?;
    tracing::info!(
        granularity = %source.granularity,
        path = %source.path.display(),
        units = written,
        skipped = load.skipped,
        "Geography loaded"
    );
    Ok(written)
}
