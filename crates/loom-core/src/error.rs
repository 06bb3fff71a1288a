use thiserror::Error;

/// Top-level failure taxonomy shared by every component in the engine.
///
/// Each crate's local error type converts into this one via `From`, so
/// callers at the orchestrator boundary only ever match on `LoomError`.
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no provider available: {0}")]
    NoProvider(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LoomError {
    /// Short lowercase tag matching the error-kind names in the external
    /// failure taxonomy — stable across versions, safe to log or return
    /// to callers alongside a sanitized message.
    pub fn code(&self) -> &'static str {
        match self {
            LoomError::Validation(_) => "validation",
            LoomError::NotFound(_) => "not_found",
            LoomError::Authorization(_) => "authorization",
            LoomError::Conflict(_) => "conflict",
            LoomError::Configuration(_) => "configuration",
            LoomError::ProviderUnavailable(_) => "provider_unavailable",
            LoomError::NoProvider(_) => "no_provider",
            LoomError::RateLimit(_) => "rate_limit",
            LoomError::Transient(_) => "transient",
            LoomError::Cancelled => "cancelled",
            LoomError::Timeout { .. } => "timeout",
            LoomError::Internal(_) => "internal",
            LoomError::Database(_) => "transient",
            LoomError::Serialization(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoomError>;
