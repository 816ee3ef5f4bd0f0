// Error handling module
// Defines the errors surfaced to callers of the client

use thiserror::Error;

use crate::classifier::ClassifiedError;

/// Errors returned by the verb methods of the client
#[derive(Error, Debug)]
pub enum ApiError {
    /// The remote call failed and was classified
    #[error("Request rejected: {0}")]
    Rejected(ClassifiedError),

    /// Success payload did not decode into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request could not be built (bad URL, bad header value, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// The classified rejection, when the failure came from the remote side
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            ApiError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ClassifiedError> for ApiError {
    fn from(err: ClassifiedError) -> Self {
        ApiError::Rejected(err)
    }
}

/// Credential store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ErrorCategory, RecoveryAction};

    #[test]
    fn test_error_messages() {
        let err = ApiError::Decode("expected array".to_string());
        assert_eq!(err.to_string(), "Decode error: expected array");

        let err = ApiError::InvalidRequest("relative URL without a base".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid request: relative URL without a base"
        );
    }

    #[test]
    fn test_rejected_exposes_classification() {
        let classified = ClassifiedError {
            category: ErrorCategory::NotFound,
            status: Some(404),
            message: None,
            action: RecoveryAction::Notify,
        };
        let err: ApiError = classified.clone().into();
        assert_eq!(err.classified(), Some(&classified));
        assert!(err.to_string().starts_with("Request rejected:"));

        assert!(ApiError::Decode("x".to_string()).classified().is_none());
    }

    #[test]
    fn test_store_error_message() {
        assert_eq!(StoreError::Poisoned.to_string(), "Store lock poisoned");
    }
}
