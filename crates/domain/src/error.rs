//! Domain error types.

use common::{Money, OrderId, ProductId};
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by domain rules and record validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantity must be a positive integer.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// Price must not be negative.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: Money },

    /// Stock count must not be negative.
    #[error("Invalid stock for product {product_id}: {stock}")]
    InvalidStock { product_id: ProductId, stock: i64 },

    /// A stored line total does not equal quantity × unit price.
    #[error("Line total mismatch for product {product_id}: expected {expected}, found {actual}")]
    LineTotalMismatch {
        product_id: ProductId,
        expected: Money,
        actual: Money,
    },

    /// An order total does not equal the sum of its line totals.
    #[error("Total mismatch for order {order_id}: expected {expected}, found {actual}")]
    TotalMismatch {
        order_id: OrderId,
        expected: Money,
        actual: Money,
    },

    /// Status string read from the store is not a known status.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// The requested status change is not allowed.
    #[error("Invalid transition: cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Items are immutable once the order has left `pending`.
    #[error("Order items cannot be changed in status {status}")]
    ItemsLocked { status: OrderStatus },

    /// A cart line references a product that does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Requested quantity exceeds available stock.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Checkout attempted with no cart lines.
    #[error("Cart is empty")]
    EmptyCart,
}
