//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// stock shortfalls, workflow guards). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed or non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A workflow transition was attempted from a state that does not allow it.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// An allocation would oversell a pool. The caller may resubmit with a
    /// lower quantity.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Issuing custody would push a worker past the configured per-item cap.
    #[error("custody limit exceeded: limit {limit}, outstanding {outstanding}, requested {requested}")]
    CustodyLimitExceeded {
        limit: i64,
        outstanding: i64,
        requested: i64,
    },

    /// The commander-reserve approval stage has not been granted yet.
    ///
    /// Surfaced as a distinct pending condition, not a hard failure.
    #[error("commander approval required: {0}")]
    AuthorizationRequired(String),

    /// A concurrent writer won; retries were exhausted.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A domain invariant was violated (programming or data-corruption bug).
    /// Logged at highest severity by the caller, never silently repaired.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// The acting user's role does not grant the required action.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn authorization_required(msg: impl Into<String>) -> Self {
        Self::AuthorizationRequired(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
