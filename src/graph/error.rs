use thiserror::Error;

use super::types::FailureKind;

/// Errors raised by the graph stores and the coordinator.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Referenced entity, relation or index entry is absent
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Duplicate entity name or relation tuple
    #[error("{what} already exists: {key} (id {existing_id})")]
    Conflict {
        what: &'static str,
        key: String,
        existing_id: String,
    },

    /// Malformed input
    #[error("invalid input: {0}")]
    Validation(String),

    /// A relation mutation committed but the knowledge index was not updated
    #[error("knowledge index out of sync: {0}")]
    ConsistencyGap(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("operation log is closed")]
    LogClosed,
}

impl GraphError {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    /// The per-item failure this error maps to, or `None` for errors that
    /// must abort the whole call.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::NotFound { .. } => Some(FailureKind::NotFound),
            Self::Conflict { .. } => Some(FailureKind::Conflict),
            Self::Validation(_) => Some(FailureKind::Invalid),
            _ => None,
        }
    }

    /// Id of the pre-existing record behind a conflict.
    pub fn existing_id(&self) -> Option<&str> {
        match self {
            Self::Conflict { existing_id, .. } => Some(existing_id),
            _ => None,
        }
    }
}

/// Convenient Result type using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::not_found("entity", "Ghost");
        assert_eq!(err.to_string(), "entity not found: Ghost");

        let err = GraphError::Conflict {
            what: "relation",
            key: "A -knows-> B".into(),
            existing_id: "r1".into(),
        };
        assert!(err.to_string().contains("already exists"));
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: GraphError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, GraphError::Database(_)));
        assert!(err.failure_kind().is_none());
    }
}
