use thiserror::Error;

pub type Result<T, E = TermbaseError> = std::result::Result<T, E>;

/// Error taxonomy for the versioning and query engines.
///
/// `NotFound` and `Conflict` are ordinary control-flow outcomes callers are
/// expected to handle. `IntegrityViolation` and `RecursionLimitExceeded`
/// indicate broken invariants and are never downgraded. The core performs no
/// retries; retrying is a caller responsibility.
#[derive(Debug, Error)]
pub enum TermbaseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("recursion limit of {limit} exceeded while {context}")]
    RecursionLimitExceeded { limit: u32, context: String },

    #[error("invalid expression constraint: {0}")]
    InvalidExpression(String),

    #[error("invalid branch path '{0}': {1}")]
    InvalidPath(String, String),

    #[error("terms clause on '{field}' has {count} values, store limit is {limit}")]
    TooManyClauses {
        field: String,
        count: usize,
        limit: usize,
    },

    #[error("document store unavailable: {0}")]
    Upstream(String),

    #[error("document serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TermbaseError {
    pub fn not_found(message: impl Into<String>) -> Self {
        TermbaseError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        TermbaseError::Conflict(message.into())
    }

    /// Integrity violations indicate a bug or a write race that should have
    /// been prevented; they are logged loudly at the point of detection.
    pub fn integrity(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{}", message);
        TermbaseError::IntegrityViolation(message)
    }
}
