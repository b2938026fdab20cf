//! Shared types used across the storefront crates.

mod money;
mod types;

pub use money::Money;
pub use types::{ChangeId, OrderId, OrderItemId, ProductId, SagaId, UserId};
