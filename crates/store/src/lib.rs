//! Data-access layer over the remote table store.
//!
//! The store offers no multi-row transactions to its callers. Each contract
//! here is a single-row or single-batch operation. Stock is only ever moved
//! through the ledger's atomic per-product operations, and order writes are
//! compare-and-set on the order's version.

pub mod cart;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod orders;
pub mod postgres;

pub use cart::CartStore;
pub use error::{Result, StoreError};
pub use ledger::{
    AdjustOutcome, AdjustmentKey, AdjustmentKind, StockAdjustment, StockLedger, StockLedgerExt,
    held_units,
};
pub use memory::InMemoryStore;
pub use orders::{OrderStore, OrderStoreExt};
pub use postgres::PostgresStore;

/// Everything the checkout saga and the order lifecycle need from the store.
pub trait TableStore: StockLedger + CartStore + OrderStore + Clone + 'static {}

impl<T: StockLedger + CartStore + OrderStore + Clone + 'static> TableStore for T {}
