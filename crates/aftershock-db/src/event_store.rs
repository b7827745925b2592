//! Event metadata, one row per ingested event version.

use aftershock_types::Event;
use sqlx::PgPool;

use crate::error::DbError;

/// Operations on the `event_metadata` table.
pub struct EventMetadataStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EventMetadataStore<'a> {
    /// Create a new metadata store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Record the metadata and epicenter of one event version.
    ///
    /// Returns `false` when the version was already recorded.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn record(&self, event: &Event) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"INSERT INTO event_metadata
                (event_id, updated, title, magnitude, place, occurred_at, depth_km,
                 status, url, detail_url, epicenter)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                      ST_SetSRID(ST_MakePoint($11, $12), 4326))
              ON CONFLICT (event_id, updated) DO NOTHING",
        )
        .bind(event.id.as_str())
        .bind(event.updated)
        .bind(event.title.as_deref())
        .bind(event.magnitude)
        .bind(&event.place)
        .bind(event.time)
        .bind(event.epicenter.depth_km)
        .bind(&event.status)
        .bind(event.url.as_deref())
        .bind(&event.detail_url)
        .bind(event.epicenter.longitude)
        .bind(event.epicenter.latitude)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
