//! Error taxonomy shared by repositories, the buffer, and HTTP handlers.
//!
//! The variants are semantic, not structural: callers branch on *what kind*
//! of failure occurred (buffer it? retry it? drop it? surface it?) rather
//! than on the concrete source error, which travels along as context.

use thiserror::Error;

/// Classified failure from a storage dependency or the write buffer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input at the adapter boundary (nil payload, bad field).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The target record does not exist. Deletes treat this as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// A dependency (primary store or buffer) is not reachable. Drives
    /// buffering on the request path and retry on the drain path.
    #[error("dependency unavailable: {0}")]
    Unavailable(anyhow::Error),

    /// The record cannot be deserialized or dispatched. Never retried.
    #[error("poison record: {0}")]
    Poison(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    /// Wraps an arbitrary error as `Unavailable`.
    pub fn unavailable(err: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable(err.into())
    }

    /// Returns `true` for failures caused by an unreachable dependency.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns `true` for permanently undecodable/undispatchable records.
    #[must_use]
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Poison(_))
    }

    /// Returns `true` when the target record was missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(StoreError::unavailable(std::io::Error::other("down")).is_unavailable());
        assert!(StoreError::Poison("garbage".into()).is_poison());
        assert!(StoreError::NotFound("t1".into()).is_not_found());
        assert!(!StoreError::Invalid("empty".into()).is_unavailable());
    }

    #[test]
    fn display_includes_kind() {
        let err = StoreError::NotFound("task t9".into());
        assert_eq!(err.to_string(), "not found: task t9");
    }
}
