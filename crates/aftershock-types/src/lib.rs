//! Shared type definitions for the Aftershock ShakeMap exposure pipeline.
//!
//! This crate is the single source of truth for the values that flow
//! between the feed poller, the geometry store and the exposure
//! aggregator.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier wrappers for events, geography units and poll runs
//! - [`enums`] -- Hazard layers and version transitions
//! - [`structs`] -- Events, ledger entries, hazard cells, exposure records

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{HazardDataset, Transition, UnknownVariant};
pub use ids::{EventId, RunId, UnitId};
pub use structs::{
    CellIndex, CellKey, Epicenter, Event, EventVersion, ExposureRecord, GeographyUnit,
    HazardCell, HazardStats, InsertSummary, LayerExposure, ShakeMapProduct, StatusLogEntry,
    severity_class,
};
