use thiserror::Error;

/// Result type for attachment operations
pub type AttachResult<T> = Result<T, AttachError>;

/// Errors that can occur while managing attachments
#[derive(Error, Debug)]
pub enum AttachError {
    /// A candidate file failed one or more validation rules. Recoverable:
    /// the attachment state is left unchanged.
    #[error("validation failed ({} issue(s))", .issues.len())]
    Validation { issues: Vec<ValidationIssue> },

    /// A processor or extractor produced something the pipeline cannot
    /// persist. Programming error, never retried.
    #[error("invalid pipeline result: {message}")]
    InvalidResult { message: String },

    /// Storage I/O failure. Retryable via the retry wrapper.
    #[error("storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No backend registered under this tier name.
    #[error("unknown storage tier: {tier}")]
    UnknownTier { tier: String },

    /// No object at this location.
    #[error("file not found: {location}")]
    NotFound { location: String },

    /// Internal signal: a promotion's compare-and-swap detected a concurrent
    /// reassignment. Swallowed by the promoter, never surfaced to callers.
    #[error("promotion lost the race to a newer assignment")]
    RaceLost,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AttachError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid-result error
    pub fn invalid_result<S: Into<String>>(message: S) -> Self {
        Self::InvalidResult {
            message: message.into(),
        }
    }

    /// Create an unknown-tier error
    pub fn unknown_tier<S: Into<String>>(tier: S) -> Self {
        Self::UnknownTier { tier: tier.into() }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(location: S) -> Self {
        Self::NotFound {
            location: location.into(),
        }
    }

    /// Create a validation error from collected issues
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation { issues }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// A single failed validation rule, collected on the attacher rather than
/// raised, so callers can inspect every failure at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
}

impl ValidationIssue {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
