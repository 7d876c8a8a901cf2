use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::DomainError;

/// HTTP-facing wrapper discriminating the domain taxonomy into status codes.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound => StatusCode::NOT_FOUND,
            DomainError::OwnershipDenied => StatusCode::FORBIDDEN,
            DomainError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            DomainError::StoreUnavailable(_) | DomainError::RegistryUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // The Display impls are already caller-safe; sources stay in logs.
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}
