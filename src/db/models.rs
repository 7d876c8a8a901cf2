use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// One registered meter. `device_id` is the external identifier the unit
/// authenticates and publishes with; `username` is the owning account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub device_id: String,
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One sanitized three-phase sample, as produced by the payload validator.
///
/// All fifteen values are finite by construction; `recorded_at` is the
/// device-reported timestamp or the ingestion time when the device sent
/// none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub va: f64,
    pub vb: f64,
    pub vc: f64,
    pub ia: f64,
    pub ib: f64,
    pub ic: f64,
    pub pa: f64,
    pub pb: f64,
    pub pc: f64,
    pub pfa: f64,
    pub pfb: f64,
    pub pfc: f64,
    pub energy_import: f64,
    pub energy_export: f64,
    pub energy_total: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Reading {
    /// Field-name/value pairs in wire order, for defensive re-checks and
    /// positional binding.
    pub fn fields(&self) -> [(&'static str, f64); 15] {
        [
            ("Va", self.va),
            ("Vb", self.vb),
            ("Vc", self.vc),
            ("Ia", self.ia),
            ("Ib", self.ib),
            ("Ic", self.ic),
            ("Pa", self.pa),
            ("Pb", self.pb),
            ("Pc", self.pc),
            ("PFa", self.pfa),
            ("PFb", self.pfb),
            ("PFc", self.pfc),
            ("Ei", self.energy_import),
            ("Ee", self.energy_export),
            ("Et", self.energy_total),
        ]
    }
}

/// A persisted reading row from a per-device table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    pub va: f64,
    pub vb: f64,
    pub vc: f64,
    pub ia: f64,
    pub ib: f64,
    pub ic: f64,
    pub pa: f64,
    pub pb: f64,
    pub pc: f64,
    pub pfa: f64,
    pub pfb: f64,
    pub pfc: f64,
    pub energy_import: f64,
    pub energy_export: f64,
    pub energy_total: f64,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Energy consumed on one calendar day, derived from the cumulative total
/// counter as `GREATEST(max − min, 0)` over that day's samples.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct DailyEnergy {
    pub date: NaiveDate,
    pub energy: f64,
    pub sample_count: i64,
}

/// Today's consumption summary. Zero counters and null timestamps when no
/// sample has arrived yet today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TodayEnergy {
    pub energy: f64,
    pub start_counter: f64,
    pub end_counter: f64,
    pub sample_count: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One point of today's power curve.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct PowerPoint {
    pub time: DateTime<Utc>,
    pub va: f64,
    pub vb: f64,
    pub vc: f64,
    pub pa: f64,
    pub pb: f64,
    pub pc: f64,
    pub total_power: f64,
}

/// Energy consumed in one calendar month (1–12) of the requested year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MonthlyEnergy {
    pub month: u32,
    pub energy: f64,
}
