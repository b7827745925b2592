//! Derived exposure records.
//!
//! Records for one (event, granularity) pair are replaced as a whole in a
//! single transaction, so readers never observe a half-written result and
//! a re-run never leaves stale units behind.

use aftershock_types::{EventId, ExposureRecord, HazardStats, UnitId};
use sqlx::PgPool;

use crate::error::DbError;

/// Operations on the `exposure_records` table.
pub struct ExposureStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ExposureStore<'a> {
    /// Create a new exposure store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Replace every record of `event_id` at `granularity` with `records`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete or insert fails; the
    /// previous records are then left untouched.
    pub async fn replace(
        &self,
        event_id: &EventId,
        granularity: &str,
        records: &[ExposureRecord],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r"DELETE FROM exposure_records WHERE event_id = $1 AND granularity = $2")
            .bind(event_id.as_str())
            .bind(granularity)
            .execute(&mut *tx)
            .await?;

        if !records.is_empty() {
            let columns = ExposureColumns::from_records(records);
            let [mmi_max, mmi_min, mmi_avg] = &columns.mmi;
            let [pga_max, pga_min, pga_avg] = &columns.pga;
            let [pgv_max, pgv_min, pgv_avg] = &columns.pgv;
            sqlx::query(
                r"INSERT INTO exposure_records
                    (granularity, unit_id, event_id,
                     mmi_max, mmi_min, mmi_avg,
                     pga_max, pga_min, pga_avg,
                     pgv_max, pgv_min, pgv_avg,
                     mmi_int, geom)
                  SELECT k, u, e, a1, a2, a3, b1, b2, b3, c1, c2, c3, s,
                         ST_Multi(ST_GeomFromText(g, 4326))
                  FROM UNNEST(
                      $1::TEXT[], $2::TEXT[], $3::TEXT[],
                      $4::DOUBLE PRECISION[], $5::DOUBLE PRECISION[], $6::DOUBLE PRECISION[],
                      $7::DOUBLE PRECISION[], $8::DOUBLE PRECISION[], $9::DOUBLE PRECISION[],
                      $10::DOUBLE PRECISION[], $11::DOUBLE PRECISION[], $12::DOUBLE PRECISION[],
                      $13::INTEGER[], $14::TEXT[]
                  ) AS t(k, u, e, a1, a2, a3, b1, b2, b3, c1, c2, c3, s, g)",
            )
            .bind(&columns.granularity)
            .bind(&columns.unit_id)
            .bind(&columns.event_id)
            .bind(mmi_max)
            .bind(mmi_min)
            .bind(mmi_avg)
            .bind(pga_max)
            .bind(pga_min)
            .bind(pga_avg)
            .bind(pgv_max)
            .bind(pgv_min)
            .bind(pgv_avg)
            .bind(&columns.mmi_int)
            .bind(&columns.geometry)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            event_id = %event_id,
            granularity,
            count = records.len(),
            "Replaced exposure records"
        );
        Ok(())
    }

    /// All records of an event at one granularity, ordered by unit id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn fetch(
        &self,
        event_id: &EventId,
        granularity: &str,
    ) -> Result<Vec<ExposureRecord>, DbError> {
        let rows = sqlx::query_as::<_, ExposureRow>(
            r"SELECT granularity, unit_id, event_id,
                     mmi_max, mmi_min, mmi_avg,
                     pga_max, pga_min, pga_avg,
                     pgv_max, pgv_min, pgv_avg,
                     mmi_int, ST_AsText(geom) AS geometry_wkt
              FROM exposure_records
              WHERE event_id = $1 AND granularity = $2
              ORDER BY unit_id",
        )
        .bind(event_id.as_str())
        .bind(granularity)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ExposureRecord::from).collect())
    }
}

/// Column arrays for one UNNEST insert.
#[derive(Default)]
struct ExposureColumns {
    granularity: Vec<String>,
    unit_id: Vec<String>,
    event_id: Vec<String>,
    mmi: [Vec<Option<f64>>; 3],
    pga: [Vec<Option<f64>>; 3],
    pgv: [Vec<Option<f64>>; 3],
    mmi_int: Vec<Option<i32>>,
    geometry: Vec<String>,
}

impl ExposureColumns {
    fn from_records(records: &[ExposureRecord]) -> Self {
        let mut columns = Self::default();
        for record in records {
            columns.granularity.push(record.granularity.clone());
            columns.unit_id.push(record.unit_id.as_str().to_owned());
            columns.event_id.push(record.event_id.as_str().to_owned());
            push_stats(&mut columns.mmi, record.intensity.as_ref());
            push_stats(&mut columns.pga, record.acceleration.as_ref());
            push_stats(&mut columns.pgv, record.velocity.as_ref());
            columns.mmi_int.push(record.severity_class);
            columns.geometry.push(record.geometry_wkt.clone());
        }
        columns
    }
}

fn push_stats(target: &mut [Vec<Option<f64>>; 3], stats: Option<&HazardStats>) {
    let [max, min, avg] = target;
    max.push(stats.map(|s| s.max));
    min.push(stats.map(|s| s.min));
    avg.push(stats.map(|s| s.avg));
}

/// A row from the `exposure_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExposureRow {
    /// Geography granularity.
    pub granularity: String,
    /// Geography unit.
    pub unit_id: String,
    /// Event identifier.
    pub event_id: String,
    /// Maximum intensity.
    pub mmi_max: Option<f64>,
    /// Minimum intensity.
    pub mmi_min: Option<f64>,
    /// Mean intensity.
    pub mmi_avg: Option<f64>,
    /// Maximum acceleration.
    pub pga_max: Option<f64>,
    /// Minimum acceleration.
    pub pga_min: Option<f64>,
    /// Mean acceleration.
    pub pga_avg: Option<f64>,
    /// Maximum velocity.
    pub pgv_max: Option<f64>,
    /// Minimum velocity.
    pub pgv_min: Option<f64>,
    /// Mean velocity.
    pub pgv_avg: Option<f64>,
    /// Severity class.
    pub mmi_int: Option<i32>,
    /// Unit geometry as WKT.
    pub geometry_wkt: String,
}

const fn stats_of(max: Option<f64>, min: Option<f64>, avg: Option<f64>) -> Option<HazardStats> {
    match (max, min, avg) {
        (Some(max), Some(min), Some(avg)) => Some(HazardStats { max, min, avg }),
        _ => None,
    }
}

impl From<ExposureRow> for ExposureRecord {
    fn from(row: ExposureRow) -> Self {
        Self {
            unit_id: UnitId::from(row.unit_id),
            event_id: EventId::from(row.event_id),
            granularity: row.granularity,
            intensity: stats_of(row.mmi_max, row.mmi_min, row.mmi_avg),
            acceleration: stats_of(row.pga_max, row.pga_min, row.pga_avg),
            velocity: stats_of(row.pgv_max, row.pgv_min, row.pgv_avg),
            severity_class: row.mmi_int,
            geometry_wkt: row.geometry_wkt,
        }
    }
}
