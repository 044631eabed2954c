use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("REQUEST_FAILED: {0}")]
    Request(String),
    #[error("PARTIAL_COMMIT: {moved} entries moved, {failed} failed")]
    PartialCommit { moved: usize, failed: usize },
    #[error("STALE_REFERENCE: {0}")]
    StaleReference(String),
    #[error("VALIDATION_FAILED: {0}")]
    Validation(String),
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable short code, matching the prefix of the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(_) => "REQUEST_FAILED",
            Self::PartialCommit { .. } => "PARTIAL_COMMIT",
            Self::StaleReference(_) => "STALE_REFERENCE",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Folds a suggestion-service error into `Request`, keeping local validation errors as they are.
    pub fn into_request_failure(self) -> Self {
        match self {
            Self::Request(_) | Self::Validation(_) => self,
            other => Self::Request(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
