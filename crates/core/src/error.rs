use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The caller passed arguments that contradict each other. This is a
    /// programming error, never a user-facing condition.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether the error is a recoverable condition the caller can report
    /// back to the user (as opposed to a bug or an infrastructure failure).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = CoreError::NotFound {
            entity: "revision",
            id: 42,
        };
        assert_eq!(err.to_string(), "Entity not found: revision with id 42");
    }

    #[test]
    fn recoverable_classification() {
        assert!(CoreError::Validation("x".into()).is_recoverable());
        assert!(CoreError::NotFound { entity: "doc", id: 1 }.is_recoverable());
        assert!(!CoreError::PreconditionViolation("x".into()).is_recoverable());
        assert!(!CoreError::Storage("x".into()).is_recoverable());
    }
}
