//! Enumeration types shared across the pipeline.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    /// The enum being parsed.
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

impl core::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ---------------------------------------------------------------------------
// Hazard layers
// ---------------------------------------------------------------------------

/// One hazard layer of a ShakeMap product.
///
/// The declaration order is the aggregation order: intensity first (it is
/// the spine of the merged exposure table), then acceleration, then
/// velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardDataset {
    /// Modified Mercalli intensity contours (`mi.shp`).
    Intensity,
    /// Peak ground acceleration contours (`pga.shp`).
    Acceleration,
    /// Peak ground velocity contours (`pgv.shp`).
    Velocity,
}

impl HazardDataset {
    /// All layers in aggregation order.
    pub const PROCESSING_ORDER: [Self; 3] = [Self::Intensity, Self::Acceleration, Self::Velocity];

    /// Layer name as used in the ShakeMap archive and the `dataset` column.
    pub const fn layer_name(self) -> &'static str {
        match self {
            Self::Intensity => "mi",
            Self::Acceleration => "pga",
            Self::Velocity => "pgv",
        }
    }

    /// Shapefile name of this layer inside an extracted archive.
    pub fn shapefile_name(self) -> String {
        format!("{}.shp", self.layer_name())
    }
}

impl core::fmt::Display for HazardDataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.layer_name())
    }
}

impl FromStr for HazardDataset {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mi" => Ok(Self::Intensity),
            "pga" => Ok(Self::Acceleration),
            "pgv" => Ok(Self::Velocity),
            other => Err(UnknownVariant {
                kind: "hazard dataset",
                value: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Version transitions
// ---------------------------------------------------------------------------

/// Outcome of comparing an event against its last ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// No ledger entry exists for the event id.
    New,
    /// Status or updated timestamp differs from the last entry.
    Updated,
    /// Status and updated timestamp both match the last entry.
    Unchanged,
}

impl Transition {
    /// Whether this transition requires downloading and ingesting data.
    pub const fn requires_ingestion(self) -> bool {
        matches!(self, Self::New | Self::Updated)
    }

    /// Stable lowercase name stored in the ledger.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

impl core::fmt::Display for Transition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "updated" => Ok(Self::Updated),
            "unchanged" => Ok(Self::Unchanged),
            other => Err(UnknownVariant {
                kind: "transition",
                value: other.to_owned(),
            }),
        }
    }
}
