//! Checkout saga step names.

/// The saga type identifier for checkout.
pub const SAGA_TYPE: &str = "Checkout";

/// Step name: read the user's cart lines.
pub const STEP_LOAD_CART: &str = "load_cart";

/// Step name: optimistic stock check and total computation.
pub const STEP_VALIDATE_STOCK: &str = "validate_stock";

/// Step name: create the `pending` order header. This is the commit point.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: write the order item batch.
pub const STEP_CREATE_ITEMS: &str = "create_items";

/// Step name: conditionally decrement stock, one product at a time.
pub const STEP_RESERVE_STOCK: &str = "reserve_stock";

/// Step name: best-effort cart deletion.
pub const STEP_CLEAR_CART: &str = "clear_cart";

/// Forward steps in execution order.
pub const STEPS: [&str; 6] = [
    STEP_LOAD_CART,
    STEP_VALIDATE_STOCK,
    STEP_CREATE_ORDER,
    STEP_CREATE_ITEMS,
    STEP_RESERVE_STOCK,
    STEP_CLEAR_CART,
];
