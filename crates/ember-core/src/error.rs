//! Cross-component error taxonomy.
//!
//! Every fallible operation that crosses a component boundary (Coordinator,
//! Verifier, Task Service, Runner Protocol Service) returns a
//! [`ServiceError`] tagged with an [`ErrorCategory`]. Background loops
//! (Agent Runner Loop, Supervisor) match on the category to decide whether
//! to retry, log and continue, or escalate to an Exception; `ember-server`
//! maps the category straight to an HTTP status code.

use thiserror::Error;

/// Broad classification of a failure, used for retry/escalation policy and
/// HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed request or a state machine conflict. Not retried.
    Validation,
    /// No valid session/credential presented.
    Unauthenticated,
    /// Session/agent ownership mismatch.
    Ownership,
    /// Requested resource does not exist.
    NotFound,
    /// Store/LLM transient failure. Safe to retry with backoff.
    Transient,
    /// Lost an optimistic-lock race (conditional claim affected 0 rows).
    Conflict,
    /// Internal failure with no more specific category.
    Internal,
}

/// A structured error carrying an [`ErrorCategory`] alongside the
/// underlying cause.
#[derive(Debug, Error)]
#[error("{category:?}: {message}")]
pub struct ServiceError {
    pub category: ErrorCategory,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl ServiceError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unauthenticated, message)
    }

    pub fn ownership(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Ownership, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, message)
    }

    pub fn wrap(category: ErrorCategory, err: anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            category,
            source: Some(err),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::wrap(ErrorCategory::Internal, err)
    }

    pub fn transient(err: anyhow::Error) -> Self {
        Self::wrap(ErrorCategory::Transient, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_message() {
        let err = ServiceError::validation("bad priority");
        assert_eq!(err.to_string(), "Validation: bad priority");
    }

    #[test]
    fn wrap_preserves_source() {
        let cause = anyhow::anyhow!("connection reset");
        let err = ServiceError::transient(cause);
        assert_eq!(err.category, ErrorCategory::Transient);
        assert!(err.source.is_some());
    }
}
