/// Unified error types for the trust metadata resolver
use thiserror::Error;

/// Main error type for metadata resolution
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Invalid resolver configuration (fatal at setup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resolution criteria missing or malformed
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    /// Origin transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Metadata filter failure
    #[error("Filter error: {0}")]
    Filter(String),

    /// Resolver used outside its lifecycle, or an internal fatal condition
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// HTTP client errors from the origin transport
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Origin response body is not a metadata document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolverError {
    /// Whether the fetch pipeline surfaces the error to the caller.
    /// Everything else ends the refresh attempt and cached data is served.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolverError::Configuration(_)
                | ResolverError::InvalidCriteria(_)
                | ResolverError::Resolution(_)
        )
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ResolverError::Configuration(_) => "configuration",
            ResolverError::InvalidCriteria(_) => "invalid_criteria",
            ResolverError::Transport(_) | ResolverError::Http(_) => "transport",
            ResolverError::Filter(_) => "filter",
            ResolverError::Resolution(_) => "resolution",
            ResolverError::Json(_) => "decode",
        }
    }
}

/// Result type alias for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;
