//! Product stock ledger contract.

use async_trait::async_trait;
use common::{ChangeId, OrderId, ProductId};
use domain::Product;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Why a keyed stock adjustment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Units taken for an order at checkout.
    Reserve,
    /// Units taken or given back by an edit to a pending order's items.
    Amend,
    /// Undoes an `Amend` whose item write did not land.
    Revert,
    /// Everything an order still held, given back by a rollback or a
    /// cancellation. Closes the order's hold on the product.
    Release,
    /// Units re-taken after a cancellation lost its status write to a
    /// concurrent forward transition.
    Reinstate,
}

impl AdjustmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Reserve => "reserve",
            AdjustmentKind::Amend => "amend",
            AdjustmentKind::Revert => "revert",
            AdjustmentKind::Release => "release",
            AdjustmentKind::Reinstate => "reinstate",
        }
    }

    /// True for kinds that move units of an open hold. Once the order's
    /// `Release` exists these are refused, so a late step cannot take stock
    /// the release will never give back, or give back units it already did.
    pub fn needs_open_hold(&self) -> bool {
        matches!(
            self,
            AdjustmentKind::Reserve | AdjustmentKind::Amend | AdjustmentKind::Revert
        )
    }
}

/// Idempotency key of a stock adjustment.
///
/// The ledger applies at most one adjustment per key, so a retried step
/// never moves stock twice. `Amend` and `Revert` keys also carry the id of
/// the item edit they belong to; every other kind happens once per order and
/// product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentKey {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub kind: AdjustmentKind,
    pub change_id: Option<ChangeId>,
}

impl AdjustmentKey {
    /// The key closing an order's hold on a product.
    pub fn release(order_id: OrderId, product_id: ProductId) -> Self {
        Self {
            order_id,
            product_id,
            kind: AdjustmentKind::Release,
            change_id: None,
        }
    }
}

/// A conditional change to one product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    /// Signed change in units.
    pub delta: i64,
    /// The adjustment is refused if it would leave stock below this value.
    pub min_allowed: i64,
    pub key: Option<AdjustmentKey>,
}

impl StockAdjustment {
    /// Takes `quantity` units, refusing to go below zero.
    pub fn decrement(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            delta: -i64::from(quantity),
            min_allowed: 0,
            key: None,
        }
    }

    /// Gives back `quantity` units.
    pub fn increment(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            delta: i64::from(quantity),
            min_allowed: 0,
            key: None,
        }
    }

    /// Attaches an idempotency key for `order_id`.
    pub fn keyed(mut self, order_id: OrderId, kind: AdjustmentKind) -> Self {
        self.key = Some(AdjustmentKey {
            order_id,
            product_id: self.product_id,
            kind,
            change_id: None,
        });
        self
    }

    /// Attaches an idempotency key for one edit of `order_id`'s items.
    pub fn keyed_change(
        mut self,
        order_id: OrderId,
        kind: AdjustmentKind,
        change_id: ChangeId,
    ) -> Self {
        self.key = Some(AdjustmentKey {
            order_id,
            product_id: self.product_id,
            kind,
            change_id: Some(change_id),
        });
        self
    }

    /// True if this moves units of an order's hold, and is therefore
    /// refused once that hold has been released.
    pub fn needs_open_hold(&self) -> bool {
        self.key.is_some_and(|key| key.kind.needs_open_hold())
    }

    /// Returns the stock that would result from applying this to `current`,
    /// or `None` if that would violate `min_allowed`.
    pub fn apply_to(&self, current: u32) -> Option<u32> {
        let next = i64::from(current) + self.delta;
        if next < self.min_allowed {
            return None;
        }
        u32::try_from(next).ok()
    }
}

/// Units an order still holds of a product, given the deltas of every keyed
/// adjustment applied for that pair.
pub fn held_units(deltas: impl IntoIterator<Item = i64>) -> u32 {
    let net: i64 = deltas.into_iter().sum();
    u32::try_from(-net).unwrap_or(0)
}

/// Result of a conditional adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustOutcome {
    /// False if the adjustment was refused; stock is then unchanged.
    pub applied: bool,
    pub previous_stock: u32,
    pub new_stock: u32,
    /// True if the key had already been applied and nothing changed now.
    pub replayed: bool,
    /// True if the refusal was because the order's hold on the product was
    /// already released, not because stock ran short.
    pub closed: bool,
}

impl AdjustOutcome {
    pub fn applied(previous_stock: u32, new_stock: u32) -> Self {
        Self {
            applied: true,
            previous_stock,
            new_stock,
            replayed: false,
            closed: false,
        }
    }

    pub fn refused(stock: u32) -> Self {
        Self {
            applied: false,
            previous_stock: stock,
            new_stock: stock,
            replayed: false,
            closed: false,
        }
    }

    pub fn replayed(stock: u32) -> Self {
        Self {
            applied: true,
            previous_stock: stock,
            new_stock: stock,
            replayed: true,
            closed: false,
        }
    }

    pub fn closed(stock: u32) -> Self {
        Self {
            closed: true,
            ..Self::refused(stock)
        }
    }

    /// Signed stock change made by this call.
    pub fn change(&self) -> i64 {
        i64::from(self.new_stock) - i64::from(self.previous_stock)
    }
}

/// Authoritative owner of product stock.
///
/// All implementations must be thread-safe (Send + Sync) and must apply
/// every adjustment atomically per product row. Keyed adjustments are
/// recorded with their delta, which makes the ledger the record of how many
/// units each order holds.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Reads a product row.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Reads the current stock of a product.
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<u32>> {
        Ok(self.get_product(product_id).await?.map(|p| p.stock))
    }

    /// Atomically applies `adjustment` if the resulting stock would be at
    /// least `min_allowed`. A refused adjustment does not mutate anything.
    ///
    /// A `Reserve`, `Amend` or `Revert` is refused with
    /// [`AdjustOutcome::closed`] once the order's `Release` key for the
    /// product exists.
    ///
    /// Fails with `NotFound` if the product does not exist.
    async fn conditional_adjust(&self, adjustment: StockAdjustment) -> Result<AdjustOutcome>;

    /// Gives back every unit the order still holds of a product, as recorded
    /// by its keyed adjustments, and closes the hold.
    ///
    /// Units the order never took are never given back. Repeating the call
    /// is a replay.
    async fn release_hold(&self, order_id: OrderId, product_id: ProductId)
    -> Result<AdjustOutcome>;

    /// Re-takes exactly the units the order's `Release` gave back. Refused if
    /// stock is now short; a no-op if nothing was released.
    async fn reinstate_hold(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<AdjustOutcome>;

    /// Inserts or replaces a product row.
    async fn put_product(&self, product: Product) -> Result<()>;
}

/// Order-scoped convenience methods over a ledger.
#[async_trait]
pub trait StockLedgerExt: StockLedger {
    /// Takes `quantity` units of a product for an order at checkout.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<AdjustOutcome> {
        self.conditional_adjust(
            StockAdjustment::decrement(product_id, quantity)
                .keyed(order_id, AdjustmentKind::Reserve),
        )
        .await
    }

    /// Moves stock for one edit of a pending order's items. A positive
    /// `units` takes stock, a negative one gives it back.
    async fn amend(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        change_id: ChangeId,
        kind: AdjustmentKind,
        units: i64,
    ) -> Result<AdjustOutcome> {
        let quantity = u32::try_from(units.unsigned_abs()).unwrap_or(u32::MAX);
        let adjustment = if units > 0 {
            StockAdjustment::decrement(product_id, quantity)
        } else {
            StockAdjustment::increment(product_id, quantity)
        };
        self.conditional_adjust(adjustment.keyed_change(order_id, kind, change_id))
            .await
    }
}

// Blanket implementation for all StockLedger implementations
impl<T: StockLedger + ?Sized> StockLedgerExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_to() {
        let product_id = ProductId::new();
        assert_eq!(StockAdjustment::decrement(product_id, 3).apply_to(5), Some(2));
        assert_eq!(StockAdjustment::decrement(product_id, 5).apply_to(5), Some(0));
        assert_eq!(StockAdjustment::decrement(product_id, 6).apply_to(5), None);
        assert_eq!(StockAdjustment::increment(product_id, 4).apply_to(0), Some(4));
    }

    #[test]
    fn test_min_allowed_above_zero() {
        let adjustment = StockAdjustment {
            min_allowed: 2,
            ..StockAdjustment::decrement(ProductId::new(), 3)
        };
        assert_eq!(adjustment.apply_to(5), Some(2));
        assert_eq!(adjustment.apply_to(4), None);
    }

    #[test]
    fn test_keyed_uses_own_product() {
        let order_id = OrderId::new();
        let adjustment = StockAdjustment::increment(ProductId::new(), 1)
            .keyed(order_id, AdjustmentKind::Release);
        let key = adjustment.key.unwrap();
        assert_eq!(key.order_id, order_id);
        assert_eq!(key.product_id, adjustment.product_id);
        assert_eq!(key.kind, AdjustmentKind::Release);
        assert_eq!(key, AdjustmentKey::release(order_id, adjustment.product_id));
        assert!(!adjustment.needs_open_hold());
    }

    #[test]
    fn test_change_keys_are_distinct_per_edit() {
        let order_id = OrderId::new();
        let product_id = ProductId::new();
        let first = StockAdjustment::decrement(product_id, 1).keyed_change(
            order_id,
            AdjustmentKind::Amend,
            ChangeId::new(),
        );
        let second = StockAdjustment::decrement(product_id, 1).keyed_change(
            order_id,
            AdjustmentKind::Amend,
            ChangeId::new(),
        );
        assert_ne!(first.key, second.key);
        assert!(first.needs_open_hold());
        assert!(!StockAdjustment::decrement(product_id, 1).needs_open_hold());
    }

    #[test]
    fn test_held_units_nets_out_every_kind() {
        assert_eq!(held_units([]), 0);
        // reserve 3, amend +2, amend -1
        assert_eq!(held_units([-3, -2, 1]), 4);
        // ... then released
        assert_eq!(held_units([-3, -2, 1, 4]), 0);
        // ... then reinstated
        assert_eq!(held_units([-3, -2, 1, 4, -4]), 4);
    }

    #[test]
    fn test_closed_outcome_is_a_refusal() {
        let outcome = AdjustOutcome::closed(7);
        assert!(!outcome.applied && outcome.closed);
        assert_eq!(outcome.change(), 0);
        assert_eq!(AdjustOutcome::applied(5, 2).change(), -3);
    }
}
