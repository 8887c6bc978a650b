use catalog_core::PimError;
use thiserror::Error;

/// Failure taxonomy of a reconciliation run.
///
/// `Validation` aborts before any mutation. Every other variant is isolated to
/// the plan entry that produced it (and the entries depending on it).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid desired state: {0}")]
    Validation(String),
    #[error("{path} is occupied by {existing}, expected {desired}")]
    Conflict {
        path: String,
        existing: String,
        desired: String,
    },
    #[error("transient remote failure: {message}")]
    Transient {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote rejected request: {0}")]
    Remote(String),
}

impl SyncError {
    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SyncError::Transient {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<PimError> for SyncError {
    fn from(err: PimError) -> Self {
        if err.is_not_found() {
            SyncError::NotFound(err.to_string())
        } else if err.is_retryable() {
            SyncError::Transient {
                retry_after_secs: err.retry_after_secs(),
                message: err.to_string(),
            }
        } else {
            SyncError::Remote(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::StatusCode;

    #[test]
    fn maps_graphql_not_found() {
        let err = SyncError::from(PimError::GraphQl("Item not found".into()));
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn maps_server_errors_to_transient() {
        let err = SyncError::from(PimError::Api {
            status: StatusCode::BAD_GATEWAY,
            body: "bad gateway".into(),
            retry_after: Some(2),
        });
        assert!(err.is_transient());
        assert_eq!(err.retry_after_secs(), Some(2));
    }

    #[test]
    fn maps_validation_rejections_to_remote() {
        let err = SyncError::from(PimError::GraphQl("Invalid parentId".into()));
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(!err.is_transient());
    }
}
