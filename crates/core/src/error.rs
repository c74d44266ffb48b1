//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// All variants are synchronous, deterministic outcomes. None of them are
/// retried by the domain itself; retry policy belongs to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A supplied quantity or threshold violates its own precondition
    /// (non-positive quantity, negative counter or threshold).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested reservation or removal exceeds what is currently held.
    ///
    /// A normal business outcome (e.g. backorder), not a defect.
    #[error("insufficient stock (available: {available}, requested: {requested})")]
    InsufficientStock { requested: i64, available: i64 },

    /// The operation would break a cross-field invariant given the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. duplicate ledger or SKU).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Stable machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidArgument(_) => "invalid_argument",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::InvalidState(_) => "invalid_state",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_both_quantities() {
        let err = DomainError::insufficient_stock(60, 50);
        assert_eq!(
            err.to_string(),
            "insufficient stock (available: 50, requested: 60)"
        );
        assert_eq!(err.kind(), "insufficient_stock");
    }

    #[test]
    fn constructors_map_to_variants() {
        assert!(matches!(
            DomainError::invalid_argument("quantity must be positive"),
            DomainError::InvalidArgument(msg) if msg == "quantity must be positive"
        ));
        assert!(matches!(
            DomainError::invalid_state("x"),
            DomainError::InvalidState(_)
        ));
        assert_eq!(DomainError::not_found(), DomainError::NotFound);
    }
}
