//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use inventory::InventoryError;
use payments::WebhookError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
///
/// Bodies are `{"error": message, "code": code}`; 503 responses also carry
/// `"retryable": true`.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    Domain(DomainError),
    Inventory(InventoryError),
    Webhook(WebhookError),
    Store(StoreError),
}

impl ApiError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "validation_error",
            ApiError::Domain(err) => err.code(),
            ApiError::Inventory(err) => err.code(),
            ApiError::Webhook(err) => err.code(),
            ApiError::Store(err) if err.is_transient() => "transient_storage_error",
            ApiError::Store(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Domain(err) => err.to_string(),
            ApiError::Inventory(err) => err.to_string(),
            ApiError::Webhook(err) => err.to_string(),
            ApiError::Store(err) => err.to_string(),
        }
    }
}

/// HTTP status for a machine-readable error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "validation_error" => StatusCode::BAD_REQUEST,
        "authentication_error" => StatusCode::UNAUTHORIZED,
        "forbidden_manual_transition" => StatusCode::FORBIDDEN,
        "not_found" => StatusCode::NOT_FOUND,
        "transition_rejected" | "insufficient_stock" | "hold_released" => StatusCode::CONFLICT,
        "transient_storage_error" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = status_for(code);
        let message = self.message();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %message, code, "internal server error");
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!(error = %message, code, "transient failure");
            }
            _ => {}
        }

        let mut body = serde_json::json!({ "error": message, "code": code });
        if status == StatusCode::SERVICE_UNAVAILABLE {
            body["retryable"] = serde_json::Value::Bool(true);
        }
        (status, axum::Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use domain::Transition;
    use store::OrderStatus;

    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        let forbidden = ApiError::from(DomainError::ForbiddenManualTransition {
            transition: Transition::ConfirmPayment,
            target: OrderStatus::Paid,
        });
        assert_eq!(status_for(forbidden.code()), StatusCode::FORBIDDEN);

        let rejected = ApiError::from(DomainError::TransitionRejected {
            transition: Transition::Ship,
            status: OrderStatus::PendingPayment,
        });
        assert_eq!(status_for(rejected.code()), StatusCode::CONFLICT);

        let timeout = ApiError::from(StoreError::LockTimeout {
            resource: "stock".into(),
        });
        assert_eq!(status_for(timeout.code()), StatusCode::SERVICE_UNAVAILABLE);

        let signature = ApiError::from(WebhookError::InvalidSignature {
            transaction_id: "tx".into(),
        });
        assert_eq!(status_for(signature.code()), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_codes_are_internal() {
        assert_eq!(status_for("internal_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
