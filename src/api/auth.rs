use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::ApiError;
use crate::error::DomainError;

/// Header carrying the caller's identity, set by the upstream auth proxy
/// after it has verified the session. This service trusts it as-is.
pub const AUTH_USERNAME_HEADER: &str = "x-auth-username";

/// Extractor for the verified caller identity. Requests without the header
/// never reach a handler.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(AUTH_USERNAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError(DomainError::AuthenticationFailed(
                    "missing caller identity".into(),
                ))
            })?;

        Ok(Self(username.to_owned()))
    }
}
