//! Error taxonomy shared by every desk operation.
//!
//! Mutating operations are all-or-nothing per call; messages are short,
//! specific and safe to show to the requesting user.

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    /// Bad input shape, caller's fault. The message is the reason string
    /// callers surface verbatim.
    #[error("{0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The destination agent is full. Carries the agent display name so
    /// the caller can pick another agent.
    #[error("Agent {0} has reached the simultaneous ticket limit")]
    CapacityExceeded(String),
    /// Race on a uniqueness constraint or a concurrent writer; retried
    /// once internally before surfacing.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl DeskError {
    /// True when retrying with freshly recomputed values could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<diesel::result::Error> for DeskError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::NotFound => Self::NotFound("record not found".to_string()),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::Conflict(info.message().to_string())
            }
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                Self::Conflict(info.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for DeskError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<std::io::Error> for DeskError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type DeskResult<T> = Result<T, DeskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_from_diesel() {
        let err: DeskError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, DeskError::NotFound(_)));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DeskError::Conflict("code".into()).is_retryable());
        assert!(!DeskError::Validation("bad".into()).is_retryable());
        assert!(!DeskError::CapacityExceeded("Ana".into()).is_retryable());
    }

    #[test]
    fn validation_message_is_verbatim() {
        let err = DeskError::Validation("ticket is not concluded or cancelled".into());
        assert_eq!(err.to_string(), "ticket is not concluded or cancelled");
    }
}
