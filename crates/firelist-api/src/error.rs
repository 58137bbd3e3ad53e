use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an observable query collaborator.
///
/// Always delivered through a callback, never returned from a read accessor.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum QueryError {
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Query disconnected: {message}")]
    Disconnected { message: String },

    #[error("Query cancelled: {message}")]
    Cancelled { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueryError {
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Invalid key: keys must be non-empty")]
    InvalidKey,

    #[error("Collection was cancelled and cannot observe again")]
    Terminated {
        #[source]
        source: QueryError,
    },

    #[error("Diff does not apply: index {index} out of range for length {len}")]
    InconsistentDiff { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            QueryError::disconnected("socket closed").to_string(),
            "Query disconnected: socket closed"
        );
        assert_eq!(
            QueryError::internal("bad frame").to_string(),
            "Internal error: bad frame"
        );
    }

    #[test]
    fn terminated_exposes_the_query_error_as_source() {
        let error = SyncError::Terminated {
            source: QueryError::permission_denied("rooms"),
        };
        let source = error.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Permission denied: rooms"));
    }
}
