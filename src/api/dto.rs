use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::{Device, StoredReading};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceDto {
    pub id: Uuid,
    pub device_id: String,
    pub name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Device> for DeviceDto {
    fn from(d: Device) -> Self {
        Self {
            id: d.id,
            device_id: d.device_id,
            name: d.name,
            username: d.username,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// One stored sample, serialised with the meter's wire field names so the
/// dashboard renders rows exactly as the device reported them.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: i64,
    #[serde(rename = "Va")]
    pub va: f64,
    #[serde(rename = "Vb")]
    pub vb: f64,
    #[serde(rename = "Vc")]
    pub vc: f64,
    #[serde(rename = "Ia")]
    pub ia: f64,
    #[serde(rename = "Ib")]
    pub ib: f64,
    #[serde(rename = "Ic")]
    pub ic: f64,
    #[serde(rename = "Pa")]
    pub pa: f64,
    #[serde(rename = "Pb")]
    pub pb: f64,
    #[serde(rename = "Pc")]
    pub pc: f64,
    #[serde(rename = "PFa")]
    pub pfa: f64,
    #[serde(rename = "PFb")]
    pub pfb: f64,
    #[serde(rename = "PFc")]
    pub pfc: f64,
    #[serde(rename = "Ei")]
    pub energy_import: f64,
    #[serde(rename = "Ee")]
    pub energy_export: f64,
    #[serde(rename = "Et")]
    pub energy_total: f64,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredReading> for ReadingDto {
    fn from(r: StoredReading) -> Self {
        Self {
            id: r.id,
            va: r.va,
            vb: r.vb,
            vc: r.vc,
            ia: r.ia,
            ib: r.ib,
            ic: r.ic,
            pa: r.pa,
            pb: r.pb,
            pc: r.pc,
            pfa: r.pfa,
            pfb: r.pfb,
            pfc: r.pfc,
            energy_import: r.energy_import,
            energy_export: r.energy_export,
            energy_total: r.energy_total,
            recorded_at: r.recorded_at,
            created_at: r.created_at,
        }
    }
}

/// Request body for `PUT /devices/{device_id}/name`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDeviceNameRequest {
    pub name: String,
}

/// Request body for `POST /devices/{device_id}/control`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ControlRequest {
    /// `"ON"` or `"OFF"`.
    pub command: String,
}
