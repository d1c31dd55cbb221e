use crate::model::VersionNumber;
use thiserror::Error;

/// Failures of engine operations.
///
/// Identity errors that would abort a large import are recorded as dangling
/// references instead; the variants here are what reaches the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot resolve URI {0}")]
    Unresolved(String),

    #[error("Dangling reference from {holder} to {uri}")]
    DanglingReference { uri: String, holder: String },

    #[error("NOT IMPLEMENTED: multiple successors for {uri}: {candidates:?}")]
    AmbiguousSuccessor { uri: String, candidates: Vec<String> },

    #[error("Version {requested} is not greater than current version {current}")]
    VersionNotIncreasing {
        requested: VersionNumber,
        current: VersionNumber,
    },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid structure: {0}")]
    Structure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Rejections caused by the request rather than by the server
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::VersionNotIncreasing { .. }
                | EngineError::TypeMismatch { .. }
                | EngineError::Structure(_)
                | EngineError::Format(_)
                | EngineError::Json(_)
                | EngineError::Xml(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}
