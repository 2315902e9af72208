//! Domain error model.

use thiserror::Error;

use crate::value_object::Carats;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is recoverable at the caller's boundary. Only `Contention` is
/// transient; the rest require the caller to correct its input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or logically inconsistent request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested quantity exceeds what the named source currently holds.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: Carats, requested: Carats },

    /// Locks for the operation could not be acquired within the retry budget.
    #[error("contention: {0}")]
    Contention(String),

    /// A referenced packet, document item, or warehouse does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store failed (e.g. a poisoned lock).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient(available: Carats, requested: Carats) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn contention(msg: impl Into<String>) -> Self {
        Self::Contention(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Contention(_))
    }
}
