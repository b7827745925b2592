//! Backend-agnostic geometry store handle.
//!
//! The pipeline talks to [`GeometryStore`] only. Each method dispatches to
//! the `PostGIS` stores or to the in-memory tables; the two backends
//! honor the same key and idempotence rules.

use aftershock_types::{
    Event, EventId, ExposureRecord, GeographyUnit, HazardCell, HazardDataset, InsertSummary,
    LayerExposure, StatusLogEntry,
};
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::event_store::EventMetadataStore;
use crate::exposure_store::ExposureStore;
use crate::geography_store::GeographyStore;
use crate::hazard_store::HazardCellStore;
use crate::memory::MemoryStore;
use crate::postgres::PostgresPool;
use crate::status_log::StatusLogStore;

/// Storage backend selected at startup.
#[derive(Debug, Clone)]
pub enum GeometryStore {
    /// `PostgreSQL` with the `PostGIS` extension.
    Postgis(PostgresPool),
    /// Process-local tables.
    Memory(MemoryStore),
}

impl GeometryStore {
    /// Short backend name for logs.
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgis(_) => "postgis",
            Self::Memory(_) => "memory",
        }
    }

    /// The most recent ledger entry for an event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn last_status(&self, event_id: &EventId) -> Result<Option<StatusLogEntry>, DbError> {
        match self {
            Self::Postgis(pg) => StatusLogStore::new(pg.pool()).latest(event_id).await,
            Self::Memory(mem) => Ok(mem.last_status(event_id).await),
        }
    }

    /// Append one ledger entry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend insert fails.
    pub async fn append_status(&self, entry: &StatusLogEntry) -> Result<(), DbError> {
        match self {
            Self::Postgis(pg) => StatusLogStore::new(pg.pool()).append(entry).await,
            Self::Memory(mem) => {
                mem.append_status(entry.clone()).await;
                Ok(())
            }
        }
    }

    /// Every ledger entry for an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn status_history(&self, event_id: &EventId) -> Result<Vec<StatusLogEntry>, DbError> {
        match self {
            Self::Postgis(pg) => StatusLogStore::new(pg.pool()).history(event_id).await,
            Self::Memory(mem) => Ok(mem.status_history(event_id).await),
        }
    }

    /// Record metadata and epicenter of one event version.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend insert fails.
    pub async fn record_event(&self, event: &Event) -> Result<bool, DbError> {
        match self {
            Self::Postgis(pg) => EventMetadataStore::new(pg.pool()).record(event).await,
            Self::Memory(mem) => Ok(mem.record_event(event).await),
        }
    }

    /// Insert hazard cells; existing keys count as duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend insert fails.
    pub async fn insert_hazard_cells(&self, cells: &[HazardCell]) -> Result<InsertSummary, DbError> {
        match self {
            Self::Postgis(pg) => HazardCellStore::new(pg.pool()).insert(cells).await,
            Self::Memory(mem) => Ok(mem.insert_hazard_cells(cells).await),
        }
    }

    /// Number of stored cells for an event, optionally for one layer only.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn hazard_cell_count(
        &self,
        event_id: &EventId,
        dataset: Option<HazardDataset>,
    ) -> Result<u64, DbError> {
        match self {
            Self::Postgis(pg) => HazardCellStore::new(pg.pool()).count(event_id, dataset).await,
            Self::Memory(mem) => Ok(mem.hazard_cell_count(event_id, dataset).await),
        }
    }

    /// Delete cells of older versions of an event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend delete fails.
    pub async fn purge_superseded_cells(
        &self,
        event_id: &EventId,
        keep: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        match self {
            Self::Postgis(pg) => {
                HazardCellStore::new(pg.pool())
                    .purge_superseded(event_id, keep)
                    .await
            }
            Self::Memory(mem) => Ok(mem.purge_superseded_cells(event_id, keep).await),
        }
    }

    /// Insert or replace geography units.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend upsert fails.
    pub async fn upsert_geography_units(&self, units: &[GeographyUnit]) -> Result<u64, DbError> {
        match self {
            Self::Postgis(pg) => GeographyStore::new(pg.pool()).upsert(units).await,
            Self::Memory(mem) => Ok(mem.upsert_geography_units(units).await),
        }
    }

    /// Number of stored units of one granularity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn geography_unit_count(&self, granularity: &str) -> Result<u64, DbError> {
        match self {
            Self::Postgis(pg) => GeographyStore::new(pg.pool()).count(granularity).await,
            Self::Memory(mem) => Ok(mem.geography_unit_count(granularity).await),
        }
    }

    /// Per-unit statistics of one hazard layer of one event version.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn layer_exposure(
        &self,
        event_id: &EventId,
        updated: DateTime<Utc>,
        dataset: HazardDataset,
        granularity: &str,
    ) -> Result<Vec<LayerExposure>, DbError> {
        match self {
            Self::Postgis(pg) => {
                GeographyStore::new(pg.pool())
                    .layer_exposure(event_id, updated, dataset, granularity)
                    .await
            }
            Self::Memory(mem) => Ok(mem
                .layer_exposure(event_id, updated, dataset, granularity)
                .await),
        }
    }

    /// Replace every exposure record of an event at one granularity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend write fails.
    pub async fn replace_exposure(
        &self,
        event_id: &EventId,
        granularity: &str,
        records: &[ExposureRecord],
    ) -> Result<(), DbError> {
        match self {
            Self::Postgis(pg) => {
                ExposureStore::new(pg.pool())
                    .replace(event_id, granularity, records)
                    .await
            }
            Self::Memory(mem) => {
                mem.replace_exposure(event_id, granularity, records).await;
                Ok(())
            }
        }
    }

    /// Stored exposure records of an event at one granularity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    pub async fn exposure_records(
        &self,
        event_id: &EventId,
        granularity: &str,
    ) -> Result<Vec<ExposureRecord>, DbError> {
        match self {
            Self::Postgis(pg) => ExposureStore::new(pg.pool()).fetch(event_id, granularity).await,
            Self::Memory(mem) => Ok(mem.exposure_records(event_id, granularity).await),
        }
    }
}
