use chrono::{Datelike, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::db::models::{DailyEnergy, MonthlyEnergy, PowerPoint, Reading, StoredReading, TodayEnergy};
use crate::db::{quoted_table, table_name_for};
use crate::error::{DomainError, DomainResult};

/// Calendar window for the daily-energy aggregation: either the last N days
/// ending today, or one whole month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyWindow {
    Days(u32),
    Month { year: i32, month: u32 },
}

/// Append-only per-device reading storage plus the derived energy/power
/// aggregations.
///
/// Tables are provisioned lazily on the first append for a device; all
/// reads treat a missing table as "no data yet", never as an error. Energy
/// over an interval is the max−min delta of the cumulative total counter,
/// floored at zero to absorb counter resets.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    pool: PgPool,
}

impl ReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Append one validated reading, creating the device's table on first
    /// use. Returns the new row id.
    pub async fn append(&self, device_id: &str, reading: &Reading) -> DomainResult<i64> {
        // Defensive re-check: the validator is the gate, but a reading that
        // somehow bypassed it must not reach the insert.
        for (field, value) in reading.fields() {
            if !value.is_finite() {
                return Err(DomainError::validation(format!(
                    "Missing required field: {field}"
                )));
            }
        }

        let table = self.ensure_table(device_id).await?;
        let insert = format!(
            "INSERT INTO {t} \
             (va, vb, vc, ia, ib, ic, pa, pb, pc, pfa, pfb, pfc, \
              energy_import, energy_export, energy_total, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING id",
            t = quoted_table(&table),
        );

        let id: i64 = sqlx::query_scalar(&insert)
            .bind(reading.va)
            .bind(reading.vb)
            .bind(reading.vc)
            .bind(reading.ia)
            .bind(reading.ib)
            .bind(reading.ic)
            .bind(reading.pa)
            .bind(reading.pb)
            .bind(reading.pc)
            .bind(reading.pfa)
            .bind(reading.pfb)
            .bind(reading.pfc)
            .bind(reading.energy_import)
            .bind(reading.energy_export)
            .bind(reading.energy_total)
            .bind(reading.recorded_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DomainError::StoreUnavailable)?;

        info!(device_id = %device_id, row_id = id, "Reading persisted");
        Ok(id)
    }

    /// Idempotent, race-tolerant table provisioning. Two concurrent first
    /// writers may both run the DDL; the loser's duplicate error is absorbed.
    async fn ensure_table(&self, device_id: &str) -> DomainResult<String> {
        let table = table_name_for(device_id).ok_or_else(|| {
            DomainError::validation(format!("invalid device id: {device_id:?}"))
        })?;
        let quoted = quoted_table(&table);

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\
                 id BIGSERIAL PRIMARY KEY, \
                 va DOUBLE PRECISION NOT NULL, \
                 vb DOUBLE PRECISION NOT NULL, \
                 vc DOUBLE PRECISION NOT NULL, \
                 ia DOUBLE PRECISION NOT NULL, \
                 ib DOUBLE PRECISION NOT NULL, \
                 ic DOUBLE PRECISION NOT NULL, \
                 pa DOUBLE PRECISION NOT NULL, \
                 pb DOUBLE PRECISION NOT NULL, \
                 pc DOUBLE PRECISION NOT NULL, \
                 pfa DOUBLE PRECISION NOT NULL, \
                 pfb DOUBLE PRECISION NOT NULL, \
                 pfc DOUBLE PRECISION NOT NULL, \
                 energy_import DOUBLE PRECISION NOT NULL, \
                 energy_export DOUBLE PRECISION NOT NULL, \
                 energy_total DOUBLE PRECISION NOT NULL, \
                 recorded_at TIMESTAMPTZ NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now()\
             )"
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{table}_recorded_at\" ON {quoted} (recorded_at)"
        );

        for stmt in [ddl, index] {
            if let Err(e) = sqlx::query(&stmt).execute(&self.pool).await {
                // IF NOT EXISTS still races at commit; the duplicate means
                // the concurrent writer won and the object exists.
                if !is_duplicate_object(&e) {
                    return Err(DomainError::StoreUnavailable(e));
                }
            }
        }

        debug!(table = %table, "Reading table ready");
        Ok(table)
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// The `limit` most recent readings, newest first. A device that has
    /// never reported yields an empty list.
    pub async fn latest(&self, device_id: &str, limit: i64) -> DomainResult<Vec<StoredReading>> {
        let Some(table) = table_name_for(device_id) else {
            return Err(DomainError::validation(format!(
                "invalid device id: {device_id:?}"
            )));
        };
        let query = format!(
            "SELECT id, va, vb, vc, ia, ib, ic, pa, pb, pc, pfa, pfb, pfc, \
                    energy_import, energy_export, energy_total, recorded_at, created_at \
             FROM {t} ORDER BY created_at DESC, id DESC LIMIT $1",
            t = quoted_table(&table),
        );

        match sqlx::query_as::<_, StoredReading>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(DomainError::StoreUnavailable(e)),
        }
    }

    /// Per-day energy deltas over the window, zero-filled for days (and
    /// devices) without samples.
    pub async fn daily_energy(
        &self,
        device_id: &str,
        window: DailyWindow,
    ) -> DomainResult<Vec<DailyEnergy>> {
        let Some(table) = table_name_for(device_id) else {
            return Err(DomainError::validation(format!(
                "invalid device id: {device_id:?}"
            )));
        };
        let (start, end) = window_bounds(window, Utc::now().date_naive());

        let query = format!(
            "SELECT gs::date AS date, \
                    COALESCE(GREATEST(agg.max_et - agg.min_et, 0), 0)::float8 AS energy, \
                    COALESCE(agg.sample_count, 0) AS sample_count \
             FROM generate_series($1::date, $2::date, interval '1 day') AS gs \
             LEFT JOIN ( \
                 SELECT recorded_at::date AS date, \
                        MAX(energy_total) AS max_et, \
                        MIN(energy_total) AS min_et, \
                        COUNT(*) AS sample_count \
                 FROM {t} \
                 WHERE recorded_at >= $1::date AND recorded_at < $2::date + interval '1 day' \
                 GROUP BY recorded_at::date \
             ) agg ON agg.date = gs::date \
             ORDER BY gs::date ASC",
            t = quoted_table(&table),
        );

        match sqlx::query_as::<_, DailyEnergy>(&query)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) if is_undefined_table(&e) => Ok(zero_filled_days(start, end)),
            Err(e) => Err(DomainError::StoreUnavailable(e)),
        }
    }

    /// Today's consumption so far: max−min of the cumulative total counter,
    /// floored at zero.
    pub async fn today_energy(&self, device_id: &str) -> DomainResult<TodayEnergy> {
        let Some(table) = table_name_for(device_id) else {
            return Err(DomainError::validation(format!(
                "invalid device id: {device_id:?}"
            )));
        };
        let query = format!(
            "SELECT MIN(energy_total) AS start_counter, \
                    MAX(energy_total) AS end_counter, \
                    COUNT(*) AS sample_count, \
                    MIN(recorded_at) AS start_time, \
                    MAX(recorded_at) AS end_time \
             FROM {t} WHERE recorded_at::date = CURRENT_DATE",
            t = quoted_table(&table),
        );

        let row = match sqlx::query(&query).fetch_one(&self.pool).await {
            Ok(row) => row,
            Err(e) if is_undefined_table(&e) => return Ok(empty_today()),
            Err(e) => return Err(DomainError::StoreUnavailable(e)),
        };

        let sample_count: i64 = row.try_get("sample_count").map_err(internal)?;
        if sample_count == 0 {
            return Ok(empty_today());
        }

        let start_counter: f64 = row
            .try_get::<Option<f64>, _>("start_counter")
            .map_err(internal)?
            .unwrap_or(0.0);
        let end_counter: f64 = row
            .try_get::<Option<f64>, _>("end_counter")
            .map_err(internal)?
            .unwrap_or(0.0);

        Ok(TodayEnergy {
            energy: (end_counter - start_counter).max(0.0),
            start_counter,
            end_counter,
            sample_count,
            start_time: row.try_get("start_time").map_err(internal)?,
            end_time: row.try_get("end_time").map_err(internal)?,
        })
    }

    /// Today's voltage/power curve, ascending by time.
    pub async fn today_power(&self, device_id: &str) -> DomainResult<Vec<PowerPoint>> {
        let Some(table) = table_name_for(device_id) else {
            return Err(DomainError::validation(format!(
                "invalid device id: {device_id:?}"
            )));
        };
        let query = format!(
            "SELECT recorded_at AS time, va, vb, vc, pa, pb, pc, \
                    (pa + pb + pc)::float8 AS total_power \
             FROM {t} WHERE recorded_at::date = CURRENT_DATE \
             ORDER BY recorded_at ASC",
            t = quoted_table(&table),
        );

        match sqlx::query_as::<_, PowerPoint>(&query).fetch_all(&self.pool).await {
            Ok(rows) => Ok(rows),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(DomainError::StoreUnavailable(e)),
        }
    }

    /// Per-month energy deltas for one year, all twelve months zero-filled.
    pub async fn monthly_energy(
        &self,
        device_id: &str,
        year: i32,
    ) -> DomainResult<Vec<MonthlyEnergy>> {
        let Some(table) = table_name_for(device_id) else {
            return Err(DomainError::validation(format!(
                "invalid device id: {device_id:?}"
            )));
        };
        let query = format!(
            "SELECT gs AS month, \
                    COALESCE(GREATEST(agg.max_et - agg.min_et, 0), 0)::float8 AS energy \
             FROM generate_series(1, 12) AS gs \
             LEFT JOIN ( \
                 SELECT EXTRACT(MONTH FROM recorded_at)::int4 AS month, \
                        MAX(energy_total) AS max_et, \
                        MIN(energy_total) AS min_et \
                 FROM {t} \
                 WHERE recorded_at >= make_date($1, 1, 1) \
                   AND recorded_at < make_date($1 + 1, 1, 1) \
                 GROUP BY EXTRACT(MONTH FROM recorded_at) \
             ) agg ON agg.month = gs \
             ORDER BY gs ASC",
            t = quoted_table(&table),
        );

        let rows = match sqlx::query(&query).bind(year).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => return Ok(zero_filled_months()),
            Err(e) => return Err(DomainError::StoreUnavailable(e)),
        };

        rows.into_iter()
            .map(|row| {
                Ok(MonthlyEnergy {
                    month: row.try_get::<i32, _>("month").map_err(internal)? as u32,
                    energy: row.try_get("energy").map_err(internal)?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Inclusive calendar bounds of a daily window, relative to `today`.
fn window_bounds(window: DailyWindow, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match window {
        DailyWindow::Days(days) => {
            let days = days.max(1);
            (today - chrono::Days::new(u64::from(days) - 1), today)
        }
        DailyWindow::Month { year, month } => {
            let start = NaiveDate::from_ymd_opt(year, month, 1)
                .unwrap_or_else(|| today.with_day(1).expect("day 1 always valid"));
            let end = start
                .checked_add_months(chrono::Months::new(1))
                .map(|next| next - chrono::Days::new(1))
                .unwrap_or(start);
            (start, end)
        }
    }
}

fn zero_filled_days(start: NaiveDate, end: NaiveDate) -> Vec<DailyEnergy> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| DailyEnergy { date, energy: 0.0, sample_count: 0 })
        .collect()
}

fn zero_filled_months() -> Vec<MonthlyEnergy> {
    (1..=12).map(|month| MonthlyEnergy { month, energy: 0.0 }).collect()
}

fn empty_today() -> TodayEnergy {
    TodayEnergy {
        energy: 0.0,
        start_counter: 0.0,
        end_counter: 0.0,
        sample_count: 0,
        start_time: None,
        end_time: None,
    }
}

/// SQLSTATE 42P01: relation does not exist — the device has no table yet.
fn is_undefined_table(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01"))
}

/// SQLSTATE 42P07 (duplicate_table) or 23505 (unique_violation on the
/// catalog) — the losing side of a concurrent `CREATE TABLE IF NOT EXISTS`.
fn is_duplicate_object(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("42P07") | Some("23505"))
    )
}

fn internal(e: sqlx::Error) -> DomainError {
    DomainError::Internal(e.into())
}
