use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use utoipa::OpenApi;

use super::auth::AuthenticatedUser;
use super::dto::{ControlRequest, DeviceDto, ReadingDto, UpdateDeviceNameRequest};
use super::errors::ApiError;
use super::AppState;
use crate::db::models::{DailyEnergy, Device, MonthlyEnergy, PowerPoint, TodayEnergy};
use crate::error::DomainError;
use crate::sensors::DailyWindow;
use crate::validation::validate_device_id;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DailyEnergyParams {
    /// Window length ending today. Ignored when `month` is given.
    pub days: Option<u32>,
    /// Whole-month window, `YYYY-MM`.
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MonthlyEnergyParams {
    pub year: Option<i32>,
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

const DEFAULT_LATEST_LIMIT: i64 = 100;
const MAX_LATEST_LIMIT: i64 = 10_000;
const DEFAULT_WINDOW_DAYS: u32 = 30;
const MAX_WINDOW_DAYS: u32 = 365;

fn checked_device_id(device_id: &str) -> Result<(), ApiError> {
    validate_device_id(device_id)
        .map_err(|e| ApiError(DomainError::validation(e.to_string())))
}

fn checked_limit(params: &LatestParams) -> Result<i64, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LATEST_LIMIT);
    if !(1..=MAX_LATEST_LIMIT).contains(&limit) {
        return Err(ApiError(DomainError::validation(format!(
            "limit must be between 1 and {MAX_LATEST_LIMIT}"
        ))));
    }
    Ok(limit)
}

fn checked_window(params: &DailyEnergyParams) -> Result<DailyWindow, ApiError> {
    if let Some(month) = &params.month {
        let parsed = month
            .split_once('-')
            .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
            .filter(|(y, m)| (1970..=2100).contains(y) && (1..=12).contains(m));
        return match parsed {
            Some((year, month)) => Ok(DailyWindow::Month { year, month }),
            None => Err(ApiError(DomainError::validation(
                "month must be formatted as YYYY-MM".to_owned(),
            ))),
        };
    }

    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(ApiError(DomainError::validation(format!(
            "days must be between 1 and {MAX_WINDOW_DAYS}"
        ))));
    }
    Ok(DailyWindow::Days(days))
}

fn checked_year(params: &MonthlyEnergyParams) -> Result<i32, ApiError> {
    let year = params.year.unwrap_or_else(|| Utc::now().year());
    if !(1970..=2100).contains(&year) {
        return Err(ApiError(DomainError::validation(
            "year must be between 1970 and 2100".to_owned(),
        )));
    }
    Ok(year)
}

/// Resolve the device and require that `user` owns it. A missing device is
/// indistinguishable from a foreign one — both deny — so unauthorized
/// callers cannot probe which identifiers exist.
async fn owned_device(
    state: &AppState,
    device_id: &str,
    user: &AuthenticatedUser,
) -> Result<Device, ApiError> {
    checked_device_id(device_id)?;
    match state.registry.get_by_device_id(device_id).await? {
        Some(device) if device.username == user.0 => Ok(device),
        _ => Err(ApiError(DomainError::OwnershipDenied)),
    }
}

// ---------------------------------------------------------------------------
// Device handlers
// ---------------------------------------------------------------------------

/// List the caller's devices, most recently updated first.
#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Devices owned by the caller", body = Vec<DeviceDto>),
        (status = 401, description = "Missing caller identity"),
        (status = 503, description = "Registry unavailable"),
    ),
    tag = "devices"
)]
pub async fn list_devices(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<DeviceDto>>, ApiError> {
    let devices = state.registry.list_by_owner(&user.0).await?;
    Ok(Json(devices.into_iter().map(Into::into).collect()))
}

/// Fetch one device by identifier (ownership-checked).
#[utoipa::path(
    get,
    path = "/devices/{device_id}",
    params(("device_id" = String, Path, description = "Meter identifier")),
    responses(
        (status = 200, description = "Device", body = DeviceDto),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<DeviceDto>, ApiError> {
    let device = owned_device(&state, &device_id, &user).await?;
    Ok(Json(device.into()))
}

/// Rename a device (ownership-checked).
#[utoipa::path(
    put,
    path = "/devices/{device_id}/name",
    params(("device_id" = String, Path, description = "Meter identifier")),
    request_body = UpdateDeviceNameRequest,
    responses(
        (status = 200, description = "Updated device", body = DeviceDto),
        (status = 400, description = "Empty or oversized name"),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "devices"
)]
pub async fn update_device_name(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateDeviceNameRequest>,
) -> Result<Json<DeviceDto>, ApiError> {
    owned_device(&state, &device_id, &user).await?;

    let name = body.name.trim();
    if name.is_empty() || name.len() > 255 {
        return Err(ApiError(DomainError::validation(
            "name must be 1-255 characters".to_owned(),
        )));
    }

    let device = state.registry.update_name(&device_id, name).await?;
    Ok(Json(device.into()))
}

/// Send an ON/OFF command to a device (ownership-checked).
#[utoipa::path(
    post,
    path = "/devices/{device_id}/control",
    params(("device_id" = String, Path, description = "Meter identifier")),
    request_body = ControlRequest,
    responses(
        (status = 202, description = "Command published"),
        (status = 400, description = "Unknown command"),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "devices"
)]
pub async fn send_control(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    user: AuthenticatedUser,
    Json(body): Json<ControlRequest>,
) -> Result<StatusCode, ApiError> {
    owned_device(&state, &device_id, &user).await?;

    let command = body.command.parse()?;
    state.control.send_command(&device_id, command, &user.0).await?;
    Ok(StatusCode::ACCEPTED)
}

// ---------------------------------------------------------------------------
// Reading handlers
// ---------------------------------------------------------------------------

/// The N most recent readings for a device, newest first.
#[utoipa::path(
    get,
    path = "/sensors/{device_id}/latest",
    params(
        ("device_id" = String, Path, description = "Meter identifier"),
        ("limit" = Option<i64>, Query, description = "Row count, 1-10000 (default 100)"),
    ),
    responses(
        (status = 200, description = "Most recent readings", body = Vec<ReadingDto>),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "sensors"
)]
pub async fn latest_readings(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<LatestParams>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<ReadingDto>>, ApiError> {
    owned_device(&state, &device_id, &user).await?;
    let limit = checked_limit(&params)?;

    let rows = state.store.latest(&device_id, limit).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Per-day energy for the requested window (`?days=N` or `?month=YYYY-MM`),
/// zero-filled for days without samples.
#[utoipa::path(
    get,
    path = "/sensors/{device_id}/daily-energy",
    params(
        ("device_id" = String, Path, description = "Meter identifier"),
        ("days" = Option<u32>, Query, description = "Window length, 1-365 (default 30)"),
        ("month" = Option<String>, Query, description = "Whole month, YYYY-MM"),
    ),
    responses(
        (status = 200, description = "Daily energy series", body = Vec<DailyEnergy>),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "sensors"
)]
pub async fn daily_energy(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<DailyEnergyParams>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<DailyEnergy>>, ApiError> {
    owned_device(&state, &device_id, &user).await?;
    let window = checked_window(&params)?;

    Ok(Json(state.store.daily_energy(&device_id, window).await?))
}

/// Today's consumption summary.
#[utoipa::path(
    get,
    path = "/sensors/{device_id}/today-energy",
    params(("device_id" = String, Path, description = "Meter identifier")),
    responses(
        (status = 200, description = "Today's energy", body = TodayEnergy),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "sensors"
)]
pub async fn today_energy(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<TodayEnergy>, ApiError> {
    owned_device(&state, &device_id, &user).await?;
    Ok(Json(state.store.today_energy(&device_id).await?))
}

/// Today's voltage/power curve, ascending by time.
#[utoipa::path(
    get,
    path = "/sensors/{device_id}/today-power",
    params(("device_id" = String, Path, description = "Meter identifier")),
    responses(
        (status = 200, description = "Today's power curve", body = Vec<PowerPoint>),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "sensors"
)]
pub async fn today_power(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<PowerPoint>>, ApiError> {
    owned_device(&state, &device_id, &user).await?;
    Ok(Json(state.store.today_power(&device_id).await?))
}

/// Monthly energy for one year (default: current year).
#[utoipa::path(
    get,
    path = "/sensors/{device_id}/monthly-energy",
    params(
        ("device_id" = String, Path, description = "Meter identifier"),
        ("year" = Option<i32>, Query, description = "Calendar year (default: current)"),
    ),
    responses(
        (status = 200, description = "Monthly energy series", body = Vec<MonthlyEnergy>),
        (status = 403, description = "Not the caller's device"),
    ),
    tag = "sensors"
)]
pub async fn monthly_energy(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<MonthlyEnergyParams>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<MonthlyEnergy>>, ApiError> {
    owned_device(&state, &device_id, &user).await?;
    let year = checked_year(&params)?;

    Ok(Json(state.store.monthly_energy(&device_id, year).await?))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness plus database connectivity.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and databases healthy"),
        (status = 503, description = "Database degraded"),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let healthy = state.db.health_check().await;
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": { "healthy": healthy },
        })),
    )
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_devices,
        get_device,
        update_device_name,
        send_control,
        latest_readings,
        daily_energy,
        today_energy,
        today_power,
        monthly_energy,
        health,
    ),
    components(schemas(
        DeviceDto,
        ReadingDto,
        UpdateDeviceNameRequest,
        ControlRequest,
        DailyEnergy,
        TodayEnergy,
        PowerPoint,
        MonthlyEnergy,
    )),
    tags(
        (name = "devices", description = "Device registry endpoints"),
        (name = "sensors", description = "Reading and energy endpoints"),
        (name = "system",  description = "System endpoints"),
    ),
    info(
        title = "Power Meter Service API",
        version = "0.1.0",
        description = "REST API for three-phase power meter telemetry"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
