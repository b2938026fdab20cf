//! Order headers, line items and their lifecycle.

mod number;
mod record;
mod state;

pub use number::generate_order_number;
pub use record::{NewOrder, NewOrderItem, Order, OrderItem, OrderWithItems};
pub use state::OrderStatus;
