//! Error Types
//!
//! Crate-wide error taxonomy. Every operation of the payment service returns
//! [`PaymentError`]; storage implementations return [`StoreError`], which is
//! folded into `PaymentError` at the repository boundary.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Storage collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unique constraint violated on table {table}: {detail}")]
    UniqueViolation { table: String, detail: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row in table {table}: {detail}")]
    Corrupt { table: String, detail: String },

    #[error("Transaction already committed or rolled back")]
    TransactionFinished,

    #[error("Storage lock poisoned")]
    Poisoned,
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e
            && db.code().as_deref() == Some("23505")
        {
            return StoreError::UniqueViolation {
                table: db.table().unwrap_or_default().to_string(),
                detail: db.message().to_string(),
            };
        }
        StoreError::Database(e.to_string())
    }
}

/// Diagnostics carried by a denied state transition.
///
/// Serialized as JSON when handed to an outer API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDenied {
    pub entity: String,
    pub identity: String,
    pub current_state: String,
    pub action: String,
    pub available_actions: Vec<String>,
}

impl fmt::Display for TransitionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in state ({}) cannot perform {}; available actions: [{}]",
            self.entity,
            self.identity,
            self.current_state,
            self.action,
            self.available_actions.join(",")
        )
    }
}

/// Payment error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Bad input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Attempt to change an order total that is already committed.
    #[error(
        "Order {order_id} already has total amount {committed}, refusing to change it to {requested}"
    )]
    AmountInconsistency {
        order_id: String,
        committed: i64,
        requested: i64,
    },

    /// Action not legal from the current persisted state.
    #[error("State transition denied: {0}")]
    StateTransitionDenied(Box<TransitionDenied>),

    #[error("{entity} not found: {identity}")]
    NotFound {
        entity: &'static str,
        identity: String,
    },

    /// Transient storage failure or a lost conditional-update race.
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl PaymentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PaymentError::Validation(msg.into())
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "VALIDATION_ERROR",
            PaymentError::AmountInconsistency { .. } => "AMOUNT_INCONSISTENCY",
            PaymentError::StateTransitionDenied(_) => "STATE_TRANSITION_DENIED",
            PaymentError::NotFound { .. } => "NOT_FOUND",
            PaymentError::Persistence(_) => "PERSISTENCE_FAILURE",
        }
    }

    /// Whether the whole operation may be retried from scratch.
    ///
    /// Conditional updates make a re-read + re-transform idempotent, so only
    /// persistence failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Persistence(_))
    }

    pub fn denied(&self) -> Option<&TransitionDenied> {
        match self {
            PaymentError::StateTransitionDenied(d) => Some(d),
            _ => None,
        }
    }
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation { table, detail } => {
                PaymentError::Validation(format!("duplicate row in {}: {}", table, detail))
            }
            other => PaymentError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
