//! Raw hazard cell persistence.
//!
//! Cells are keyed by (event, version, layer, contour value). A repeated
//! insert of the same key is absorbed by `ON CONFLICT DO NOTHING` and
//! reported as a duplicate, never as an error, so re-running an ingest
//! for an already stored version is harmless.

use aftershock_types::{EventId, HazardCell, HazardDataset, InsertSummary};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use wkt::ToWkt;

use crate::error::DbError;

/// Default batch size for cell inserts.
const DEFAULT_BATCH_SIZE: usize = 500;

/// Operations on the `hazard_cells` table.
pub struct HazardCellStore<'a> {
    pool: &'a PgPool,
    batch_size: usize,
}

impl<'a> HazardCellStore<'a> {
    /// Create a new hazard cell store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the batch size for inserts.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Batch-insert hazard cells.
    ///
    /// Each batch is a single `INSERT ... SELECT FROM UNNEST` inside its
    /// own transaction. Geometry travels as WKT and is promoted to
    /// `MULTIPOLYGON` in SRID 4326 on the way in.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if an insert fails.
    pub async fn insert(&self, cells: &[HazardCell]) -> Result<InsertSummary, DbError> {
        let mut summary = InsertSummary::default();
        if cells.is_empty() {
            return Ok(summary);
        }

        for chunk in cells.chunks(self.batch_size.max(1)) {
            let mut tx = self.pool.begin().await?;

            let len = chunk.len();
            let mut event_ids = Vec::with_capacity(len);
            let mut updated = Vec::with_capacity(len);
            let mut datasets = Vec::with_capacity(len);
            let mut values = Vec::with_capacity(len);
            let mut geometries = Vec::with_capacity(len);

            for cell in chunk {
                event_ids.push(cell.key.event_id.as_str().to_owned());
                updated.push(cell.key.updated);
                datasets.push(cell.key.dataset.layer_name().to_owned());
                values.push(cell.key.param_value);
                geometries.push(cell.geometry.wkt_string());
            }

            let result = sqlx::query(
                r"INSERT INTO hazard_cells (event_id, updated, dataset, param_value, geom)
                  SELECT e, u, d, v, ST_Multi(ST_GeomFromText(g, 4326))
                  FROM UNNEST($1::TEXT[], $2::TIMESTAMPTZ[], $3::TEXT[], $4::DOUBLE PRECISION[], $5::TEXT[])
                    AS t(e, u, d, v, g)
                  ON CONFLICT (event_id, updated, dataset, param_value) DO NOTHING",
            )
            .bind(&event_ids)
            .bind(&updated)
            .bind(&datasets)
            .bind(&values)
            .bind(&geometries)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            let inserted = result.rows_affected();
            let attempted = u64::try_from(len).unwrap_or(u64::MAX);
            summary.inserted = summary.inserted.saturating_add(inserted);
            summary.duplicates = summary
                .duplicates
                .saturating_add(attempted.saturating_sub(inserted));
        }

        tracing::debug!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "Inserted hazard cells (batch UNNEST)"
        );
        Ok(summary)
    }

    /// Number of stored cells for an event, optionally for one layer only.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count(
        &self,
        event_id: &EventId,
        dataset: Option<HazardDataset>,
    ) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r"SELECT COUNT(*) FROM hazard_cells
              WHERE event_id = $1 AND ($2::TEXT IS NULL OR dataset = $2)",
        )
        .bind(event_id.as_str())
        .bind(dataset.map(HazardDataset::layer_name))
        .fetch_one(self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete every cell of an event that does not belong to `keep`.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn purge_superseded(
        &self,
        event_id: &EventId,
        keep: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(r"DELETE FROM hazard_cells WHERE event_id = $1 AND updated <> $2")
            .bind(event_id.as_str())
            .bind(keep)
            .execute(self.pool)
            .await?;

        let purged = result.rows_affected();
        tracing::debug!(event_id = %event_id, purged, "Purged superseded hazard cells");
        Ok(purged)
    }
}
