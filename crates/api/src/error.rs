//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use serde_json::{Value, json};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    #[error("{0}")]
    Unauthorized(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Checkout, lifecycle or cart failure.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Saga(err) => saga_error_to_response(err),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, Value) {
    match &err {
        SagaError::EmptyCart | SagaError::InvalidQuantity(_) => {
            (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
        }
        SagaError::InsufficientStock {
            product_id,
            requested,
            available,
            shortfall,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": err.to_string(),
                "product_id": product_id,
                "requested": requested,
                "available": available,
                "shortfall": shortfall,
            }),
        ),
        SagaError::ProductNotFound(product_id) => (
            StatusCode::NOT_FOUND,
            json!({ "error": err.to_string(), "product_id": product_id }),
        ),
        SagaError::NotFound { .. } => (StatusCode::NOT_FOUND, json!({ "error": err.to_string() })),
        SagaError::InvalidTransition { from, to } => (
            StatusCode::CONFLICT,
            json!({ "error": err.to_string(), "from": from, "to": to }),
        ),
        SagaError::ItemsLocked { status } => (
            StatusCode::CONFLICT,
            json!({ "error": err.to_string(), "status": status }),
        ),
        SagaError::Conflict(_) => (StatusCode::CONFLICT, json!({ "error": err.to_string() })),
        SagaError::OrderItemCreation(_) | SagaError::UpstreamUnavailable(_) => {
            tracing::warn!(error = %err, "checkout dependency unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "Service temporarily unavailable, please retry" }),
            )
        }
        SagaError::TimedOut { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            json!({ "error": err.to_string() }),
        ),
        SagaError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use domain::OrderStatus;

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(SagaError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SagaError::insufficient_stock(ProductId::new(), 10, 3)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::ProductNotFound(ProductId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::InvalidTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Confirmed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::ItemsLocked {
                status: OrderStatus::Shipped,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::OrderItemCreation("boom".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(SagaError::TimedOut {
                step: "create_items".into()
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::Unauthorized("missing".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
