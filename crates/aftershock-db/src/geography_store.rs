//! Reference geography and per-layer spatial aggregation.
//!
//! Geography units of every granularity share one table. The layer
//! aggregation query runs in three steps:
//!
//! 1. union the layer's cells for one event version into a coverage extent
//! 2. keep the units of the requested granularity that intersect it
//! 3. join each kept unit to every intersecting cell and reduce the cell
//!    values to max, min and mean per unit
//!
//! Step 2 keeps the join in step 3 bounded to units that can possibly be
//! affected, which matters for national tract tables.

use aftershock_types::{EventId, GeographyUnit, HazardDataset, HazardStats, LayerExposure, UnitId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use wkt::ToWkt;

use crate::error::DbError;

/// Default batch size for geography upserts.
const DEFAULT_BATCH_SIZE: usize = 500;

/// Operations on the `geography_units` table.
pub struct GeographyStore<'a> {
    pool: &'a PgPool,
    batch_size: usize,
}

impl<'a> GeographyStore<'a> {
    /// Create a new geography store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Insert or replace geography units.
    ///
    /// Returns the number of units written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if an upsert fails.
    pub async fn upsert(&self, units: &[GeographyUnit]) -> Result<u64, DbError> {
        let mut written: u64 = 0;

        for chunk in units.chunks(self.batch_size.max(1)) {
            let mut tx = self.pool.begin().await?;

            let len = chunk.len();
            let mut granularities = Vec::with_capacity(len);
            let mut unit_ids = Vec::with_capacity(len);
            let mut geometries = Vec::with_capacity(len);

            for unit in chunk {
                granularities.push(unit.granularity.clone());
                unit_ids.push(unit.unit_id.as_str().to_owned());
                geometries.push(unit.geometry.wkt_string());
            }

            let result = sqlx::query(
                r"INSERT INTO geography_units (granularity, unit_id, geom)
                  SELECT k, u, ST_Multi(ST_GeomFromText(g, 4326))
                  FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TEXT[]) AS t(k, u, g)
                  ON CONFLICT (granularity, unit_id) DO UPDATE SET geom = EXCLUDED.geom",
            )
            .bind(&granularities)
            .bind(&unit_ids)
            .bind(&geometries)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            written = written.saturating_add(result.rows_affected());
        }

        tracing::debug!(count = written, "Upserted geography units");
        Ok(written)
    }

    /// Number of stored units of one granularity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count(&self, granularity: &str) -> Result<u64, DbError> {
        let count: i64 =
            sqlx::query_scalar(r"SELECT COUNT(*) FROM geography_units WHERE granularity = $1")
                .bind(granularity)
                .fetch_one(self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Per-unit statistics of one hazard layer of one event version.
    ///
    /// Units no cell intersects are absent from the result. Rows are
    /// ordered by unit id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn layer_exposure(
        &self,
        event_id: &EventId,
        updated: DateTime<Utc>,
        dataset: HazardDataset,
        granularity: &str,
    ) -> Result<Vec<LayerExposure>, DbError> {
        let rows = sqlx::query_as::<_, LayerExposureRow>(
            r"WITH coverage AS (
                  SELECT ST_Union(geom) AS geom
                  FROM hazard_cells
                  WHERE event_id = $1 AND updated = $2 AND dataset = $3
              ),
              candidates AS (
                  SELECT g.unit_id, g.geom
                  FROM geography_units g, coverage c
                  WHERE g.granularity = $4 AND ST_Intersects(g.geom, c.geom)
              )
              SELECT c.unit_id,
                     ST_AsText(ANY_VALUE(c.geom)) AS geometry_wkt,
                     MAX(h.param_value) AS max_value,
                     MIN(h.param_value) AS min_value,
                     AVG(h.param_value) AS avg_value
              FROM candidates c
              JOIN hazard_cells h
                ON h.event_id = $1 AND h.updated = $2 AND h.dataset = $3
               AND ST_Intersects(c.geom, h.geom)
              GROUP BY c.unit_id
              ORDER BY c.unit_id",
        )
        .bind(event_id.as_str())
        .bind(updated)
        .bind(dataset.layer_name())
        .bind(granularity)
        .fetch_all(self.pool)
        .await?;

        tracing::debug!(
            event_id = %event_id,
            dataset = %dataset,
            granularity,
            units = rows.len(),
            "Aggregated hazard layer onto geography"
        );
        Ok(rows.into_iter().map(LayerExposure::from).collect())
    }
}

/// A row of the layer aggregation query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LayerExposureRow {
    /// Geography unit.
    pub unit_id: String,
    /// Unit geometry as WKT.
    pub geometry_wkt: String,
    /// Largest intersecting value.
    pub max_value: f64,
    /// Smallest intersecting value.
    pub min_value: f64,
    /// Mean of intersecting values.
    pub avg_value: f64,
}

impl From<LayerExposureRow> for LayerExposure {
    fn from(row: LayerExposureRow) -> Self {
        Self {
            unit_id: UnitId::from(row.unit_id),
            geometry_wkt: row.geometry_wkt,
            stats: HazardStats {
                max: row.max_value,
                min: row.min_value,
                avg: row.avg_value,
            },
        }
    }
}
