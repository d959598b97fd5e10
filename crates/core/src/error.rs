use thiserror::Error;

/// Errors surfaced by an object store. `NotFound` is an expected answer on lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }

    /// Worth retrying from the outer control loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_) | StoreError::AlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(StoreError::Conflict("x".into()).is_transient());
        assert!(StoreError::Unavailable("x".into()).is_transient());
        assert!(!StoreError::Invalid("x".into()).is_transient());
    }
}
