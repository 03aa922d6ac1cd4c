use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the webhook gateway. Duplicates are not errors.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The payload is missing fields or is not a callback at all.
    #[error("Invalid payment notification: {0}")]
    Validation(String),

    /// The signature does not match the payload.
    #[error("Invalid signature for transaction {transaction_id}")]
    InvalidSignature { transaction_id: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::Validation(_) => "validation_error",
            WebhookError::InvalidSignature { .. } => "authentication_error",
            WebhookError::OrderNotFound(_) => "not_found",
            WebhookError::Domain(err) => err.code(),
            WebhookError::Store(err) if err.is_transient() => "transient_storage_error",
            WebhookError::Store(_) => "internal_error",
        }
    }

    /// Returns true when the gateway should redeliver.
    pub fn is_transient(&self) -> bool {
        match self {
            WebhookError::Domain(err) => err.is_transient(),
            WebhookError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let err = WebhookError::InvalidSignature {
            transaction_id: "tx-1".into(),
        };
        assert_eq!(err.code(), "authentication_error");
        assert!(!err.is_transient());

        let err = WebhookError::from(StoreError::LockTimeout {
            resource: "order".into(),
        });
        assert_eq!(err.code(), "transient_storage_error");
        assert!(err.is_transient());
    }
}
