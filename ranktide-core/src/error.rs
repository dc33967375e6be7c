//! Error types for ranktide-core

use thiserror::Error;

/// Classification of upstream fetch failures.
///
/// The kind decides retry policy: only `Transient` failures are worth
/// re-invoking collection for; the rest need operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Network failure, timeout, or rate limit. Retryable.
    Transient,
    /// Credentials invalid for this site. Not retryable without intervention.
    Auth,
    /// Site unregistered with the upstream provider.
    NotFound,
    /// Upstream response could not be decoded.
    Validation,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::Auth => "auth",
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::Validation => "validation",
        }
    }

    /// Whether re-invoking collection later can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchErrorKind::Transient)
    }
}

/// Main error type for the ranktide-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream analytics fetch error
    #[error("fetch error ({}): {message}", .kind.as_str())]
    Fetch {
        kind: FetchErrorKind,
        message: String,
    },

    /// Collection error (invalid date, write failure, ...)
    #[error("collection error: {0}")]
    Collection(String),

    /// Enrichment capability error
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Site not found in the registry
    #[error("site not found: {0}")]
    SiteNotFound(String),

    /// Report generation error
    #[error("report error: {0}")]
    Report(String),
}

impl Error {
    /// Shorthand for a fetch error of the given kind.
    pub fn fetch(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Error::Fetch {
            kind,
            message: message.into(),
        }
    }

    /// The fetch error kind, if this is a fetch error.
    pub fn fetch_kind(&self) -> Option<FetchErrorKind> {
        match self {
            Error::Fetch { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type alias for ranktide-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_kind_retryability() {
        assert!(FetchErrorKind::Transient.is_retryable());
        assert!(!FetchErrorKind::Auth.is_retryable());
        assert!(!FetchErrorKind::NotFound.is_retryable());
        assert!(!FetchErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = Error::fetch(FetchErrorKind::Auth, "token expired");
        assert_eq!(err.to_string(), "fetch error (auth): token expired");
        assert_eq!(err.fetch_kind(), Some(FetchErrorKind::Auth));
    }
}
