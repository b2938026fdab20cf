//! Checkout saga and order lifecycle for the storefront backend.
//!
//! The table store offers no multi-row transactions, so placing an order is
//! a saga:
//! 1. Load the cart
//! 2. Validate stock and price the lines (optimistic, side-effect free)
//! 3. Create the `pending` order header (commit point)
//! 4. Create the order items
//! 5. Conditionally decrement stock, one product at a time
//! 6. Clear the cart (best effort)
//!
//! If a step after the commit point fails, its committed effects are
//! compensated in reverse order before the error is returned. Cancellation
//! restores stock first and writes the status last.

pub mod cart;
pub mod checkout;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod guard;
pub mod instance;
pub mod lifecycle;
pub mod retry;
pub mod state;

pub use cart::{CartService, CartView};
pub use config::SagaConfig;
pub use coordinator::CheckoutCoordinator;
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use guard::{InFlight, InFlightGuard};
pub use instance::SagaInstance;
pub use lifecycle::{ItemEdit, OrderLifecycle};
pub use retry::RetryPolicy;
pub use state::SagaState;
