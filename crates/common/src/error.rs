//! Error types for locheal

use thiserror::Error;

/// Result type alias using locheal Error
pub type Result<T> = std::result::Result<T, Error>;

/// locheal error types
///
/// Malformed failure input (bad DOM snapshots, missing locators) never
/// shows up here: the engine degrades it to "no candidates found".
#[derive(Error, Debug)]
pub enum Error {
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Retry budget exhausted for {id} after {attempts} attempt(s)")]
    RetryBudgetExhausted { id: String, attempts: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl Error {
    /// Whether the error came from the backing store rather than the caller
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}
