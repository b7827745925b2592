//! Append-only event status ledger.
//!
//! The ledger is the only source of truth for "what was last seen" per
//! event. Rows are never updated or deleted; the latest row for an event
//! is the one with the highest `seq`.

use aftershock_types::{EventId, RunId, StatusLogEntry, Transition};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;

/// Operations on the `event_status_log` table.
pub struct StatusLogStore<'a> {
    pool: &'a PgPool,
}

impl<'a> StatusLogStore<'a> {
    /// Create a new status log store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one ledger entry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn append(&self, entry: &StatusLogEntry) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO event_status_log (event_id, status, updated, transition, observed_at, run_id)
              VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.event_id.as_str())
        .bind(&entry.status)
        .bind(entry.updated)
        .bind(entry.transition.as_str())
        .bind(entry.observed_at)
        .bind(entry.run_id.into_inner())
        .execute(self.pool)
        .await?;

        tracing::debug!(
            event_id = %entry.event_id,
            transition = %entry.transition,
            "Appended status log entry"
        );
        Ok(())
    }

    /// The most recent entry for an event, if the event was ever seen.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails and
    /// [`DbError::InvalidRow`] if the stored transition is not recognized.
    pub async fn latest(&self, event_id: &EventId) -> Result<Option<StatusLogEntry>, DbError> {
        let row = sqlx::query_as::<_, StatusLogRow>(
            r"SELECT event_id, status, updated, transition, observed_at, run_id
              FROM event_status_log
              WHERE event_id = $1
              ORDER BY seq DESC
              LIMIT 1",
        )
        .bind(event_id.as_str())
        .fetch_optional(self.pool)
        .await?;

        row.map(StatusLogEntry::try_from).transpose()
    }

    /// Every entry for an event, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails and
    /// [`DbError::InvalidRow`] if a stored transition is not recognized.
    pub async fn history(&self, event_id: &EventId) -> Result<Vec<StatusLogEntry>, DbError> {
        let rows = sqlx::query_as::<_, StatusLogRow>(
            r"SELECT event_id, status, updated, transition, observed_at, run_id
              FROM event_status_log
              WHERE event_id = $1
              ORDER BY seq",
        )
        .bind(event_id.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(StatusLogEntry::try_from).collect()
    }
}

/// A row from the `event_status_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatusLogRow {
    /// Event identifier.
    pub event_id: String,
    /// Observed status.
    pub status: String,
    /// Observed revision timestamp.
    pub updated: DateTime<Utc>,
    /// Transition name.
    pub transition: String,
    /// Time the row was written.
    pub observed_at: DateTime<Utc>,
    /// Poll run.
    pub run_id: Uuid,
}

impl TryFrom<StatusLogRow> for StatusLogEntry {
    type Error = DbError;

    fn try_from(row: StatusLogRow) -> Result<Self, Self::Error> {
        let transition: Transition = row
            .transition
            .parse()
            .map_err(|e| DbError::InvalidRow(format!("event_status_log: {e}")))?;
        Ok(Self {
            event_id: EventId::from(row.event_id),
            status: row.status,
            updated: row.updated,
            transition,
            observed_at: row.observed_at,
            run_id: RunId::from(row.run_id),
        })
    }
}
