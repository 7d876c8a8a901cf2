use std::fmt;

/// Domain error taxonomy shared by the registry, the reading store, the
/// ingestion coordinator and the API layer.
///
/// Nothing here is fatal to the process: ingestion paths log and drop,
/// query paths surface the variant to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Bad payload or identifier. Logged and dropped at ingestion time,
    /// `400` at query time. Carries every problem found in one pass.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The readings database is unreachable or the pool is exhausted.
    #[error("reading store unavailable")]
    StoreUnavailable(#[source] sqlx::Error),

    /// The device registry database is unreachable or the pool is exhausted.
    #[error("device registry unavailable")]
    RegistryUnavailable(#[source] sqlx::Error),

    /// Caller's verified identity does not own the device. The message is
    /// deliberately generic so unauthorized callers cannot probe existence.
    #[error("access denied")]
    OwnershipDenied,

    #[error("not found")]
    NotFound,

    /// Transport-level credential rejection. The reason describes the shape
    /// of the failure, never the configured secret.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("internal error")]
    Internal(anyhow::Error),
}

/// One or more validation problems, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<String>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl From<Vec<String>> for ValidationErrors {
    fn from(errors: Vec<String>) -> Self {
        Self(errors)
    }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors(vec![msg.into()]))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
