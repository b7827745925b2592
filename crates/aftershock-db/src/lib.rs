//! Geometry store for the Aftershock pipeline (`PostGIS` + in-memory).
//!
//! The store owns four kinds of state:
//!
//! ```text
//! event_status_log   append-only ledger, one row per evaluation
//! hazard_cells       raw ShakeMap contours keyed by (event, version, layer, value)
//! geography_units    static reference polygons, one table per deployment
//! exposure_records   derived per-unit statistics, replaced per run
//! ```
//!
//! plus one metadata row per ingested event version. [`GeometryStore`]
//! selects between the `PostGIS` implementation and [`MemoryStore`].
//!
//! # Modules
//!
//! - [`postgres`] -- `PostGIS` connection pool and migrations
//! - [`status_log`] -- Event status ledger
//! - [`event_store`] -- Event metadata and epicenters
//! - [`hazard_store`] -- Batch hazard cell insertion and purge
//! - [`geography_store`] -- Reference geography and layer aggregation
//! - [`exposure_store`] -- Exposure record replacement
//! - [`memory`] -- In-memory backend
//! - [`store`] -- Backend dispatch
//! - [`error`] -- Shared error types

pub mod error;
pub mod event_store;
pub mod exposure_store;
pub mod geography_store;
pub mod hazard_store;
pub mod memory;
pub mod postgres;
pub mod status_log;
pub mod store;

pub use error::DbError;
pub use event_store::EventMetadataStore;
pub use exposure_store::{ExposureRow, ExposureStore};
pub use geography_store::{GeographyStore, LayerExposureRow};
pub use hazard_store::HazardCellStore;
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use status_log::{StatusLogRow, StatusLogStore};
pub use store::GeometryStore;
