//! Core value types: events, ledger entries, hazard cells, geography units
//! and exposure records.

use chrono::{DateTime, Utc};
use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::enums::{HazardDataset, Transition};
use crate::ids::{EventId, RunId, UnitId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Hypocenter location of an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Epicenter {
    /// Longitude in decimal degrees (WGS84).
    pub longitude: f64,
    /// Latitude in decimal degrees (WGS84).
    pub latitude: f64,
    /// Depth below the surface in kilometres.
    pub depth_km: f64,
}

/// A seismic event as materialized from one poll of the feed.
///
/// Events are never persisted as-is: only their ledger entry, metadata
/// row and hazard cells are. Both timestamps are normalized from the
/// feed's epoch milliseconds to UTC at parse time so that every
/// comparison against the ledger happens in the same unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Feed identifier.
    pub id: EventId,
    /// Preferred magnitude.
    pub magnitude: f64,
    /// Human-readable location description.
    pub place: String,
    /// Feed title (`M 6.0 - 6 km NW of American Canyon, CA`), when present.
    pub title: Option<String>,
    /// Origin time.
    pub time: DateTime<Utc>,
    /// Last revision time; the version discriminator together with `status`.
    pub updated: DateTime<Utc>,
    /// Review status label (`automatic`, `reviewed`, ...).
    pub status: String,
    /// Locator of the detail document listing products.
    pub detail_url: String,
    /// Public event page, when present.
    pub url: Option<String>,
    /// Epicenter coordinates.
    pub epicenter: Epicenter,
}

impl Event {
    /// The (status, updated) pair identifying this revision.
    pub fn version(&self) -> EventVersion {
        EventVersion {
            status: self.status.clone(),
            updated: self.updated,
        }
    }
}

/// One revision of an event: the pair the versioning gate compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventVersion {
    /// Review status label.
    pub status: String,
    /// Revision timestamp.
    pub updated: DateTime<Utc>,
}

/// The hazard-surface product selected for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShakeMapProduct {
    /// Product kind as listed in the detail document (normally `shakemap`).
    pub kind: String,
    /// Product code.
    pub code: String,
    /// Contributing network.
    pub source: String,
    /// Product status, when published.
    pub status: Option<String>,
    /// Product update time, when published.
    pub update_time: Option<DateTime<Utc>>,
    /// URL of the zipped shapefile bundle.
    pub shape_zip_url: String,
}

// ---------------------------------------------------------------------------
// Status ledger
// ---------------------------------------------------------------------------

/// One append-only row of the event status ledger.
///
/// A row is written every time the versioning gate evaluates an event,
/// including when nothing changed, so the ledger is an audit trail of
/// every poll rather than of state changes only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    /// Event the entry belongs to.
    pub event_id: EventId,
    /// Status observed in this poll.
    pub status: String,
    /// Revision timestamp observed in this poll.
    pub updated: DateTime<Utc>,
    /// Transition the gate took.
    pub transition: Transition,
    /// Wall-clock time the entry was written.
    pub observed_at: DateTime<Utc>,
    /// Poll run that produced the entry.
    pub run_id: RunId,
}

impl StatusLogEntry {
    /// Build the entry recording that `event` was evaluated in `run_id`.
    pub fn observed(event: &Event, transition: Transition, run_id: RunId) -> Self {
        Self {
            event_id: event.id.clone(),
            status: event.status.clone(),
            updated: event.updated,
            transition,
            observed_at: Utc::now(),
            run_id,
        }
    }

    /// The version this entry recorded.
    pub fn version(&self) -> EventVersion {
        EventVersion {
            status: self.status.clone(),
            updated: self.updated,
        }
    }
}

// ---------------------------------------------------------------------------
// Hazard cells
// ---------------------------------------------------------------------------

/// Natural key of a hazard cell: (event, version, layer, contour value).
///
/// Re-ingesting a version that is already stored collides on this key,
/// which the store treats as "already present" rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellKey {
    /// Owning event.
    pub event_id: EventId,
    /// Revision timestamp of the event version.
    pub updated: DateTime<Utc>,
    /// Hazard layer.
    pub dataset: HazardDataset,
    /// Contour parameter value (`PARAMVALUE`).
    pub param_value: f64,
}

impl CellKey {
    /// Totally ordered form of the key, usable as a map key.
    ///
    /// The parameter value is compared by its bit pattern.
    pub fn index(&self) -> CellIndex {
        CellIndex {
            event_id: self.event_id.clone(),
            updated: self.updated,
            dataset: self.dataset,
            param_bits: self.param_value.to_bits(),
        }
    }
}

/// Ordered map key derived from a [`CellKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellIndex {
    /// Owning event.
    pub event_id: EventId,
    /// Revision timestamp.
    pub updated: DateTime<Utc>,
    /// Hazard layer.
    pub dataset: HazardDataset,
    /// `f64::to_bits` of the parameter value.
    pub param_bits: u64,
}

impl CellIndex {
    /// The parameter value this index was built from.
    pub const fn param_value(&self) -> f64 {
        f64::from_bits(self.param_bits)
    }
}

/// One contour polygon of one hazard layer of one event version.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardCell {
    /// Natural key.
    pub key: CellKey,
    /// Contour geometry in WGS84.
    pub geometry: MultiPolygon<f64>,
}

/// Result of inserting a batch of hazard cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    /// Rows newly written.
    pub inserted: u64,
    /// Rows rejected because the key was already present.
    pub duplicates: u64,
}

// ---------------------------------------------------------------------------
// Geography and exposure
// ---------------------------------------------------------------------------

/// Static reference polygon exposure is aggregated onto.
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyUnit {
    /// Stable unit identifier.
    pub unit_id: UnitId,
    /// Granularity the unit belongs to (`tracts`, `counties`, ...).
    pub granularity: String,
    /// Unit boundary in WGS84.
    pub geometry: MultiPolygon<f64>,
}

/// Max/min/mean of the cell values a unit intersects for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardStats {
    /// Largest intersecting value.
    pub max: f64,
    /// Smallest intersecting value.
    pub min: f64,
    /// Arithmetic mean of intersecting values, each cell counted once.
    pub avg: f64,
}

impl HazardStats {
    /// Summarize a set of cell values. Returns `None` for an empty set.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let (&first, rest) = values.split_first()?;
        let (max, min, sum) = rest
            .iter()
            .fold((first, first, first), |(max, min, sum), &v| {
                (max.max(v), min.min(v), sum + v)
            });
        #[allow(clippy::cast_precision_loss)]
        let count = values.len() as f64;
        Some(Self {
            max,
            min,
            avg: sum / count,
        })
    }
}

/// Per-unit statistics for one layer, before the layers are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerExposure {
    /// Geography unit.
    pub unit_id: UnitId,
    /// Representative unit geometry as WKT.
    pub geometry_wkt: String,
    /// Statistics over the intersecting cells.
    pub stats: HazardStats,
}

/// Aggregated shaking experienced by one geography unit for one event.
///
/// Identity is (granularity, unit, event). Records are recomputed and
/// replaced wholesale on every aggregation run, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    /// Geography unit.
    pub unit_id: UnitId,
    /// Event the shaking belongs to.
    pub event_id: EventId,
    /// Granularity of the unit.
    pub granularity: String,
    /// Intensity statistics.
    pub intensity: Option<HazardStats>,
    /// Peak ground acceleration statistics.
    pub acceleration: Option<HazardStats>,
    /// Peak ground velocity statistics.
    pub velocity: Option<HazardStats>,
    /// `floor(intensity.max)`, absent without intensity coverage.
    pub severity_class: Option<i32>,
    /// Representative unit geometry as WKT.
    pub geometry_wkt: String,
}

impl ExposureRecord {
    /// Statistics for one layer.
    pub const fn stats(&self, dataset: HazardDataset) -> Option<&HazardStats> {
        match dataset {
            HazardDataset::Intensity => self.intensity.as_ref(),
            HazardDataset::Acceleration => self.acceleration.as_ref(),
            HazardDataset::Velocity => self.velocity.as_ref(),
        }
    }

    /// Mutable slot for one layer's statistics.
    pub const fn stats_mut(&mut self, dataset: HazardDataset) -> &mut Option<HazardStats> {
        match dataset {
            HazardDataset::Intensity => &mut self.intensity,
            HazardDataset::Acceleration => &mut self.acceleration,
            HazardDataset::Velocity => &mut self.velocity,
        }
    }
}

/// Integer severity class derived from a unit's maximum intensity.
///
/// `floor(max)`: 4.7 maps to class 4 and 5.0 to class 5. Non-finite input
/// has no class.
pub fn severity_class(max_intensity: f64) -> Option<i32> {
    if !max_intensity.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let class = max_intensity.floor() as i32;
    Some(class)
}
