//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse classification callers use to decide how to react to a failure.
///
/// - `Validation`: the input is malformed; nothing was changed, the caller must fix the request.
/// - `BusinessRule`: the input is well-formed but a rule forbids it in the current state.
/// - `Infrastructure`: storage/transport failure; safe to retry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

/// Domain-level error.
///
/// Deterministic business/domain failures only. Every variant names the rule
/// that failed so callers never have to inspect message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found within the tenant.
    #[error("not found")]
    NotFound,

    /// The target is not in a status that permits the operation.
    #[error("invalid status: operation requires {required}, current status is {current}")]
    InvalidStatus { current: String, required: String },

    /// A workflow transition was attempted from the wrong source state.
    #[error("invalid transition '{action}': requires {required}, current status is {current}")]
    InvalidTransition {
        action: String,
        current: String,
        required: String,
    },

    /// Four-eyes principle: the preparer may not approve their own work.
    #[error("approval by the creator of the settlement is forbidden")]
    SelfApprovalForbidden,

    /// Required calculation configuration is absent.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// A cancellation quantity exceeds what is still available on the position.
    #[error("position {position}: requested quantity {requested} exceeds available {available}")]
    QuantityExceedsOriginal {
        position: u32,
        requested: Decimal,
        available: Decimal,
    },

    /// A position index does not exist on the document.
    #[error("invalid position {position}: document has {count} positions")]
    InvalidPosition { position: u32, count: usize },

    /// The selected position has no remaining quantity.
    #[error("position {position} is already fully cancelled")]
    PositionAlreadyCancelled { position: u32 },

    /// Nothing remains to be cancelled on the document.
    #[error("all positions are already cancelled")]
    AllPositionsAlreadyCancelled,

    /// Every supplied correction equals the original values.
    #[error("no changes detected")]
    NoChangesDetected,

    /// Invoices were already generated for this allocation.
    #[error("invoices were already generated")]
    AlreadyInvoiced,

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A conflict occurred (e.g. duplicate creation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
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

    pub fn config_missing(msg: impl Into<String>) -> Self {
        Self::ConfigurationMissing(msg.into())
    }

    pub fn invalid_status(current: impl Into<String>, required: impl Into<String>) -> Self {
        Self::InvalidStatus {
            current: current.into(),
            required: required.into(),
        }
    }

    pub fn invalid_transition(
        action: impl Into<String>,
        current: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            action: action.into(),
            current: current.into(),
            required: required.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_)
            | DomainError::InvalidId(_)
            | DomainError::InvalidPosition { .. } => ErrorKind::Validation,
            _ => ErrorKind::BusinessRule,
        }
    }

    /// Stable machine-readable code for the failed rule.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::InvalidStatus { .. } => "invalid_status",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::SelfApprovalForbidden => "self_approval_forbidden",
            DomainError::ConfigurationMissing(_) => "configuration_missing",
            DomainError::QuantityExceedsOriginal { .. } => "quantity_exceeds_original",
            DomainError::InvalidPosition { .. } => "invalid_position",
            DomainError::PositionAlreadyCancelled { .. } => "position_already_cancelled",
            DomainError::AllPositionsAlreadyCancelled => "all_positions_already_cancelled",
            DomainError::NoChangesDetected => "no_changes_detected",
            DomainError::AlreadyInvoiced => "already_invoiced",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::Conflict(_) => "conflict",
            DomainError::Unauthorized => "unauthorized",
        }
    }
}
