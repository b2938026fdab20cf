//! Domain layer for the storefront backend.
//!
//! This crate provides the strongly typed records exchanged with the table
//! store and the pure rules the checkout saga is built on:
//! - `Product`, `CartLine`, `Order`, `OrderItem` records validated at the
//!   data-access boundary
//! - the `OrderStatus` state machine
//! - checkout planning (optimistic stock check and total computation)

pub mod cart;
pub mod checkout;
pub mod error;
pub mod order;
pub mod product;
pub mod query;

pub use cart::CartLine;
pub use checkout::{CheckoutLine, CheckoutPlan};
pub use common::{Money, OrderId, OrderItemId, ProductId, UserId};
pub use error::DomainError;
pub use order::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderWithItems, generate_order_number,
};
pub use product::Product;
pub use query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, OrderQuery, Page};
