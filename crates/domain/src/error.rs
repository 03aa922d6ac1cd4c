//! Domain error types.

use inventory::InventoryError;
use store::{OrderStatus, StoreError};
use thiserror::Error;

use crate::transitions::Transition;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request is malformed or misses a required input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No transition has this name.
    #[error("Unknown transition: {0}")]
    UnknownTransition(String),

    /// The transition is not allowed from the order's current status.
    #[error("Cannot {transition} an order in {status} status")]
    TransitionRejected {
        transition: Transition,
        status: OrderStatus,
    },

    /// The transition is allowed from this status but its guard failed.
    #[error("Cannot {transition}: {reason}")]
    GuardFailed {
        transition: Transition,
        reason: String,
    },

    /// Someone other than the payment gateway tried to set PAID or FAILED.
    #[error("Only the payment gateway can set this status ({target})")]
    ForbiddenManualTransition {
        transition: Transition,
        target: OrderStatus,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) | DomainError::UnknownTransition(_) => "validation_error",
            DomainError::TransitionRejected { .. } | DomainError::GuardFailed { .. } => {
                "transition_rejected"
            }
            DomainError::ForbiddenManualTransition { .. } => "forbidden_manual_transition",
            DomainError::OrderNotFound(_) => "not_found",
            DomainError::Inventory(err) => err.code(),
            DomainError::Store(err) if err.is_transient() => "transient_storage_error",
            DomainError::Store(_) | DomainError::Serialization(_) => "internal_error",
        }
    }

    /// Returns true when retrying may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DomainError::Inventory(err) => err.is_transient(),
            DomainError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
