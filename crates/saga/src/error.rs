//! Saga error types.

use common::ProductId;
use domain::{DomainError, OrderStatus};
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by checkout, cancellation and the cart service.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The user has nothing in their cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line references a product that no longer exists.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Not enough stock to cover a line.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available} (short by {shortfall})"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
        shortfall: u32,
    },

    /// The order item batch could not be written; the order was withdrawn.
    #[error("Failed to create order items: {0}")]
    OrderItemCreation(String),

    /// The addressed order (or cart line) does not exist for this user.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The requested status change is not allowed.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order has left `pending`, so its items are frozen.
    #[error("Order items cannot be changed in status {status}")]
    ItemsLocked { status: OrderStatus },

    /// Another request is mutating the same order or checking out the same cart.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A collaborator failed transiently and retries were exhausted.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Quantities must be positive.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The saga deadline expired.
    #[error("Checkout timed out during step '{step}'")]
    TimedOut { step: String },

    /// Any other store failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl SagaError {
    /// Builds an `InsufficientStock` error, computing the shortfall.
    pub fn insufficient_stock(product_id: ProductId, requested: u32, available: u32) -> Self {
        SagaError::InsufficientStock {
            product_id,
            requested,
            available,
            shortfall: requested.saturating_sub(available),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        SagaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for errors caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SagaError::EmptyCart
                | SagaError::ProductNotFound(_)
                | SagaError::InsufficientStock { .. }
                | SagaError::NotFound { .. }
                | SagaError::InvalidTransition { .. }
                | SagaError::ItemsLocked { .. }
                | SagaError::Conflict(_)
                | SagaError::InvalidQuantity(_)
        )
    }

    /// Short label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            SagaError::EmptyCart => "empty_cart",
            SagaError::ProductNotFound(_) => "product_not_found",
            SagaError::InsufficientStock { .. } => "insufficient_stock",
            SagaError::OrderItemCreation(_) => "order_item_creation",
            SagaError::NotFound { .. } => "not_found",
            SagaError::InvalidTransition { .. } => "invalid_transition",
            SagaError::ItemsLocked { .. } => "items_locked",
            SagaError::Conflict(_) => "conflict",
            SagaError::UpstreamUnavailable(_) => "upstream_unavailable",
            SagaError::InvalidQuantity(_) => "invalid_quantity",
            SagaError::TimedOut { .. } => "timed_out",
            SagaError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            return SagaError::UpstreamUnavailable(err.to_string());
        }
        match err {
            StoreError::NotFound { entity, id } => SagaError::NotFound { entity, id },
            StoreError::VersionConflict { order_id, .. } => {
                SagaError::Conflict(format!("order {order_id} was modified concurrently"))
            }
            StoreError::Decode(domain) => SagaError::from(domain),
            other => SagaError::Store(other),
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::EmptyCart => SagaError::EmptyCart,
            DomainError::ProductNotFound(product_id) => SagaError::ProductNotFound(product_id),
            DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            } => SagaError::insufficient_stock(product_id, requested, available),
            DomainError::InvalidTransition { from, to } => {
                SagaError::InvalidTransition { from, to }
            }
            DomainError::ItemsLocked { status } => SagaError::ItemsLocked { status },
            DomainError::InvalidQuantity { quantity } => SagaError::InvalidQuantity(quantity),
            other => SagaError::Store(StoreError::Decode(other)),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
