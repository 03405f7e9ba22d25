//! Error types for the Code-Scout core.

/// Result type alias for Code-Scout operations.
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Main error type for the Code-Scout data-access core.
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Malformed search input. Never retried; names the offending field
    /// and the constraint it violated so callers can correct it.
    #[error("Validation failed for '{field}': {constraint}")]
    Validation { field: String, constraint: String },

    /// A connection failed its health probe. Recoverable: the pool replaces
    /// the connection and retries the acquisition.
    #[error("Connection health check failed: {0}")]
    HealthCheckFailed(String),

    /// The acquisition retry budget is spent. Terminal.
    #[error("Connection acquisition failed after {attempts} attempts: {source}")]
    AcquisitionExhausted {
        attempts: u32,
        #[source]
        source: Box<ScoutError>,
    },

    /// The circuit breaker is open; callers should back off for the
    /// indicated duration before trying again.
    #[error("Circuit breaker open; retry in {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Underlying engine query errors.
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Storage layer errors (open/close, pragma application).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScoutError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a new health-check error
    pub fn health_check(msg: impl Into<String>) -> Self {
        Self::HealthCheckFailed(msg.into())
    }

    /// Create a new query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Whether the pool's local retry loop may retry after this error.
    ///
    /// Validation errors and circuit rejections never retry; health and
    /// transient query/timeout failures do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HealthCheckFailed(_) | Self::QueryFailed(_) | Self::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for ScoutError {
    fn from(e: rusqlite::Error) -> Self {
        Self::QueryFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_field_and_constraint() {
        let err = ScoutError::validation("tags", "at most 5 tags");
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Validation failed for 'tags': at most 5 tags"
        );
    }

    #[test]
    fn retryability_classification() {
        assert!(ScoutError::health_check("probe failed").is_retryable());
        assert!(ScoutError::timeout("acquire").is_retryable());
        assert!(!ScoutError::CircuitOpen { retry_after_ms: 500 }.is_retryable());
        assert!(!ScoutError::config("bad path").is_retryable());
    }

    #[test]
    fn exhaustion_preserves_last_cause() {
        let err = ScoutError::AcquisitionExhausted {
            attempts: 4,
            source: Box::new(ScoutError::health_check("SELECT 1 failed")),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("SELECT 1 failed"));
    }
}
