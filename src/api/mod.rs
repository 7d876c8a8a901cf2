pub mod auth;
pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::control::ControlService;
use crate::db::Db;
use crate::devices::DeviceRegistry;
use crate::sensors::ReadingStore;

/// Shared handler state: the two services, the control publisher and the
/// storage handle (for health checks).
#[derive(Clone)]
pub struct AppState {
    pub registry: DeviceRegistry,
    pub store: ReadingStore,
    pub control: ControlService,
    pub db: Db,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{device_id}", get(handlers::get_device))
        .route("/devices/{device_id}/name", put(handlers::update_device_name))
        .route("/devices/{device_id}/control", post(handlers::send_control))
        .route("/sensors/{device_id}/latest", get(handlers::latest_readings))
        .route("/sensors/{device_id}/daily-energy", get(handlers::daily_energy))
        .route("/sensors/{device_id}/today-energy", get(handlers::today_energy))
        .route("/sensors/{device_id}/today-power", get(handlers::today_power))
        .route("/sensors/{device_id}/monthly-energy", get(handlers::monthly_energy))
        .route("/health", get(handlers::health))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}
