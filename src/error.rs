use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types.
///
/// Every core failure resolves to one of these. `NotFound` deliberately covers
/// "does not exist", "not yours" and "not in a state that allows this".
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A guarded write found the document changed since it was read.
    #[error("Document {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The uniform "not found" outcome for document lookups.
    pub fn document_not_found() -> Self {
        AppError::NotFound("Document not found".into())
    }

    /// Returns `true` for persistence or content store failures, which the
    /// sweeper retries on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Storage(_))
    }
}

/// Helper conversion from anyhow::Error
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Database("down".into()).is_transient());
        assert!(AppError::Storage("timeout".into()).is_transient());
        assert!(!AppError::NotFound("x".into()).is_transient());
        assert!(!AppError::BadRequest("x".into()).is_transient());
        assert!(!AppError::Unauthorized("x".into()).is_transient());
        assert!(!AppError::Conflict(Uuid::new_v4()).is_transient());
    }

    #[test]
    fn test_from_anyhow() {
        let err: AppError = anyhow::anyhow!("boom").into();
        match err {
            AppError::Internal(msg) => assert_eq!(msg, "boom"),
            other => panic!("Expected Internal error, got: {:?}", other),
        }
    }
}
