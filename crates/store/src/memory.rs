use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, ProductId, UserId};
use domain::{
    CartLine, NewOrder, NewOrderItem, Order, OrderItem, OrderQuery, OrderStatus, OrderWithItems,
    Page, Product,
};

use crate::{
    AdjustOutcome, AdjustmentKey, AdjustmentKind, CartStore, OrderStore, Result, StockAdjustment,
    StockLedger, StoreError, held_units,
};

/// Failures to inject into the in-memory store.
#[derive(Debug, Default)]
struct Faults {
    fail_create_order: bool,
    /// Latency added to `create_order` after the header is written.
    create_order_delay: Option<Duration>,
    fail_create_items: bool,
    /// Remaining transient failures per product for stock adjustments.
    unavailable_adjustments: HashMap<ProductId, u32>,
    /// Remaining adjustments per product that are applied but whose
    /// response is lost, surfacing as a transient failure.
    lost_adjustment_responses: HashMap<ProductId, u32>,
    /// Remaining transient failures for `delete_all`.
    unavailable_cart_clears: u32,
    /// Remaining transient failures for `update_status`.
    unavailable_status_updates: u32,
    /// Remaining transient failures for `amend_items`.
    unavailable_amendments: u32,
    /// Status forced onto the order by a simulated concurrent writer just
    /// before the next `update_status` or `amend_items` runs its version
    /// check.
    race_status_update: Option<OrderStatus>,
    /// Units removed from a product right after the next item batch is
    /// written, simulating a concurrent checkout winning the race.
    steal_after_items: Option<(ProductId, u32)>,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Vec<CartLine>>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    /// Applied keyed adjustments and their deltas.
    applied_keys: HashMap<AdjustmentKey, i64>,
    faults: Faults,
}

impl State {
    fn order_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == order_id)
    }

    fn stock(&self, product_id: ProductId) -> Result<u32> {
        self.products
            .get(&product_id)
            .map(|p| p.stock)
            .ok_or_else(|| StoreError::not_found("product", product_id))
    }

    fn set_stock(&mut self, product_id: ProductId, stock: u32) {
        if let Some(product) = self.products.get_mut(&product_id) {
            product.stock = stock;
        }
    }

    fn delta_of(&self, key: &AdjustmentKey) -> Option<i64> {
        self.applied_keys.get(key).copied()
    }

    fn held(&self, order_id: OrderId, product_id: ProductId) -> u32 {
        held_units(
            self.applied_keys
                .iter()
                .filter(|(key, _)| key.order_id == order_id && key.product_id == product_id)
                .map(|(_, delta)| *delta),
        )
    }

    /// Applies the fault switches shared by every ledger call. Returns true
    /// if the call should report a lost response after applying.
    fn ledger_faults(&mut self, product_id: ProductId) -> Result<bool> {
        if let Some(remaining) = self.faults.unavailable_adjustments.get_mut(&product_id)
            && take_fault(remaining)
        {
            return Err(StoreError::Unavailable(format!(
                "stock ledger timed out for product {product_id}"
            )));
        }
        Ok(self
            .faults
            .lost_adjustment_responses
            .get_mut(&product_id)
            .is_some_and(take_fault))
    }

    fn items_of(&self, order_id: OrderId) -> Vec<OrderItem> {
        self.items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Forces a raced status onto the order, if one is pending.
    fn run_race(&mut self, order_id: OrderId) {
        if let Some(raced) = self.faults.race_status_update.take()
            && let Some(order) = self.order_mut(order_id)
        {
            order.status = raced;
            order.version += 1;
            order.updated_at = Utc::now();
        }
    }

    fn check_version(&self, order_id: OrderId, expected_version: i64) -> Result<()> {
        let order = self
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        if order.version != expected_version {
            return Err(StoreError::VersionConflict {
                order_id,
                expected: expected_version,
                actual: order.version,
            });
        }
        Ok(())
    }
}

fn lost_response(product_id: ProductId) -> StoreError {
    StoreError::Unavailable(format!(
        "stock ledger response lost for product {product_id}"
    ))
}

/// In-memory table store for testing.
///
/// Implements every store contract with the same semantics as the
/// PostgreSQL backend, plus switches for injecting failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a product and returns its id.
    pub fn seed_product(&self, product: Product) -> ProductId {
        let id = product.id;
        self.lock().products.insert(id, product);
        id
    }

    /// Returns the stock of a product, if it exists.
    pub fn stock_of(&self, product_id: ProductId) -> Option<u32> {
        self.lock().products.get(&product_id).map(|p| p.stock)
    }

    /// Sum of stock over all products.
    pub fn total_stock(&self) -> u64 {
        self.lock()
            .products
            .values()
            .map(|p| u64::from(p.stock))
            .sum()
    }

    /// Returns every stored order header.
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    /// Returns every stored order item.
    pub fn items(&self) -> Vec<OrderItem> {
        self.lock().items.clone()
    }

    /// Number of cart lines a user has.
    pub fn cart_len(&self, user_id: UserId) -> usize {
        self.lock().carts.get(&user_id).map_or(0, Vec::len)
    }

    /// Number of keyed stock adjustments applied so far.
    pub fn applied_adjustments(&self) -> usize {
        self.lock().applied_keys.len()
    }

    /// Units an order currently holds of a product, per the ledger's keys.
    pub fn held_by(&self, order_id: OrderId, product_id: ProductId) -> u32 {
        self.lock().held(order_id, product_id)
    }

    /// Makes `create_order` fail.
    pub fn set_fail_on_create_order(&self, fail: bool) {
        self.lock().faults.fail_create_order = fail;
    }

    /// Delays `create_order` responses, simulating a slow table store.
    pub fn set_create_order_delay(&self, delay: Duration) {
        self.lock().faults.create_order_delay = Some(delay);
    }

    /// Makes `create_items` fail.
    pub fn set_fail_on_create_items(&self, fail: bool) {
        self.lock().faults.fail_create_items = fail;
    }

    /// Makes the next `times` stock adjustments of a product fail transiently.
    pub fn fail_adjustments(&self, product_id: ProductId, times: u32) {
        self.lock()
            .faults
            .unavailable_adjustments
            .insert(product_id, times);
    }

    /// Applies the next `times` stock adjustments of a product but reports
    /// each as a transient failure, as if the response were lost.
    pub fn lose_adjustment_responses(&self, product_id: ProductId, times: u32) {
        self.lock()
            .faults
            .lost_adjustment_responses
            .insert(product_id, times);
    }

    /// Makes the next `times` item amendments fail transiently.
    pub fn fail_item_amendments(&self, times: u32) {
        self.lock().faults.unavailable_amendments = times;
    }

    /// Makes the next `times` cart clears fail transiently.
    pub fn fail_cart_clears(&self, times: u32) {
        self.lock().faults.unavailable_cart_clears = times;
    }

    /// Makes the next `times` status writes fail transiently.
    pub fn fail_status_updates(&self, times: u32) {
        self.lock().faults.unavailable_status_updates = times;
    }

    /// Removes `units` of a product right after the next item batch is stored.
    pub fn steal_stock_after_items(&self, product_id: ProductId, units: u32) {
        self.lock().faults.steal_after_items = Some((product_id, units));
    }

    /// Makes a concurrent writer move the order to `status` right before the
    /// next status write or item amendment, so that write loses its
    /// compare-and-set.
    pub fn race_next_status_update(&self, status: OrderStatus) {
        self.lock().faults.race_status_update = Some(status);
    }

    /// Forces an order's status without a version check, bumping the version.
    /// Simulates a writer in another process.
    pub fn force_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(order) = self.lock().order_mut(order_id) {
            order.status = status;
            order.version += 1;
            order.updated_at = Utc::now();
        }
    }
}

fn take_fault(remaining: &mut u32) -> bool {
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.lock().products.get(&product_id).cloned())
    }

    async fn conditional_adjust(&self, adjustment: StockAdjustment) -> Result<AdjustOutcome> {
        let product_id = adjustment.product_id;
        let mut state = self.lock();
        let lose_response = state.ledger_faults(product_id)?;
        let current = state.stock(product_id)?;

        if let Some(key) = adjustment.key {
            if state.applied_keys.contains_key(&key) {
                return Ok(AdjustOutcome::replayed(current));
            }
            let release = AdjustmentKey::release(key.order_id, product_id);
            if adjustment.needs_open_hold() && state.applied_keys.contains_key(&release) {
                return Ok(AdjustOutcome::closed(current));
            }
        }

        let Some(next) = adjustment.apply_to(current) else {
            return Ok(AdjustOutcome::refused(current));
        };

        state.set_stock(product_id, next);
        if let Some(key) = adjustment.key {
            state.applied_keys.insert(key, adjustment.delta);
        }
        if lose_response {
            return Err(lost_response(product_id));
        }
        Ok(AdjustOutcome::applied(current, next))
    }

    async fn release_hold(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<AdjustOutcome> {
        let mut state = self.lock();
        let lose_response = state.ledger_faults(product_id)?;
        let current = state.stock(product_id)?;

        let key = AdjustmentKey::release(order_id, product_id);
        if state.applied_keys.contains_key(&key) {
            return Ok(AdjustOutcome::replayed(current));
        }

        let held = state.held(order_id, product_id);
        let next = current.saturating_add(held);
        state.set_stock(product_id, next);
        state.applied_keys.insert(key, i64::from(held));
        if lose_response {
            return Err(lost_response(product_id));
        }
        Ok(AdjustOutcome::applied(current, next))
    }

    async fn reinstate_hold(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<AdjustOutcome> {
        let mut state = self.lock();
        let lose_response = state.ledger_faults(product_id)?;
        let current = state.stock(product_id)?;

        let key = AdjustmentKey {
            kind: AdjustmentKind::Reinstate,
            ..AdjustmentKey::release(order_id, product_id)
        };
        if state.applied_keys.contains_key(&key) {
            return Ok(AdjustOutcome::replayed(current));
        }
        let Some(released) = state.delta_of(&AdjustmentKey::release(order_id, product_id)) else {
            return Ok(AdjustOutcome::applied(current, current));
        };

        let adjustment = StockAdjustment {
            key: Some(key),
            ..StockAdjustment::decrement(product_id, u32::try_from(released).unwrap_or(0))
        };
        let Some(next) = adjustment.apply_to(current) else {
            return Ok(AdjustOutcome::refused(current));
        };
        state.set_stock(product_id, next);
        state.applied_keys.insert(key, adjustment.delta);
        if lose_response {
            return Err(lost_response(product_id));
        }
        Ok(AdjustOutcome::applied(current, next))
    }

    async fn put_product(&self, product: Product) -> Result<()> {
        self.lock().products.insert(product.id, product);
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn list_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self.lock().carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_line(&self, user_id: UserId, product_id: ProductId) -> Result<Option<CartLine>> {
        Ok(self
            .lock()
            .carts
            .get(&user_id)
            .and_then(|lines| lines.iter().find(|l| l.product_id == product_id))
            .cloned())
    }

    async fn upsert_line(&self, line: CartLine) -> Result<CartLine> {
        let mut state = self.lock();
        let lines = state.carts.entry(line.user_id).or_default();
        match lines.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(existing) => *existing = line.clone(),
            None => lines.push(line.clone()),
        }
        Ok(line)
    }

    async fn remove_line(&self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let mut state = self.lock();
        let Some(lines) = state.carts.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = lines.len();
        lines.retain(|l| l.product_id != product_id);
        Ok(lines.len() != before)
    }

    async fn delete_all(&self, user_id: UserId) -> Result<usize> {
        let mut state = self.lock();
        if take_fault(&mut state.faults.unavailable_cart_clears) {
            return Err(StoreError::Unavailable("cart table timed out".to_string()));
        }
        Ok(state.carts.remove(&user_id).map_or(0, |lines| lines.len()))
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(&self, new: NewOrder) -> Result<Order> {
        let (order, delay) = {
            let mut state = self.lock();
            if state.faults.fail_create_order {
                return Err(StoreError::Unavailable("orders table timed out".to_string()));
            }
            if state
                .orders
                .iter()
                .any(|o| o.id == new.id || o.order_number == new.order_number)
            {
                return Err(StoreError::Duplicate(format!(
                    "order {} / {}",
                    new.id, new.order_number
                )));
            }

            let order = Order::from_new(new, Utc::now());
            state.orders.push(order.clone());
            (order, state.faults.create_order_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(order)
    }

    async fn create_items(
        &self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>> {
        let mut state = self.lock();
        if state.faults.fail_create_items {
            return Err(StoreError::Unavailable(
                "order_items batch insert failed".to_string(),
            ));
        }
        if !state.orders.iter().any(|o| o.id == order_id) {
            return Err(StoreError::not_found("order", order_id));
        }

        let created: Vec<OrderItem> = items
            .iter()
            .map(|item| OrderItem::from_new(order_id, item))
            .collect();
        state.items.extend(created.iter().cloned());

        if let Some((product_id, units)) = state.faults.steal_after_items.take()
            && let Some(product) = state.products.get_mut(&product_id)
        {
            product.stock = product.stock.saturating_sub(units);
        }

        Ok(created)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn list_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self.lock().items_of(order_id))
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let state = self.lock();
        // Insertion order is creation order; reverse for newest first.
        let matching: Vec<&Order> = state
            .orders
            .iter()
            .rev()
            .filter(|o| o.user_id == query.user_id)
            .filter(|o| query.status.is_none_or(|s| o.status == s))
            .collect();

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, query, total))
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected_version: i64,
        status: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.lock();
        if take_fault(&mut state.faults.unavailable_status_updates) {
            return Err(StoreError::Unavailable("orders table timed out".to_string()));
        }
        state.run_race(order_id);
        state.check_version(order_id, expected_version)?;

        let order = state
            .order_mut(order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        order.status = status;
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn amend_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        product_id: ProductId,
        replacement: Option<NewOrderItem>,
    ) -> Result<OrderWithItems> {
        let mut state = self.lock();
        if take_fault(&mut state.faults.unavailable_amendments) {
            return Err(StoreError::Unavailable(
                "order_items amendment timed out".to_string(),
            ));
        }
        state.run_race(order_id);
        state.check_version(order_id, expected_version)?;

        state
            .items
            .retain(|i| !(i.order_id == order_id && i.product_id == product_id));
        if let Some(item) = replacement {
            state.items.push(OrderItem::from_new(order_id, &item));
        }
        let items = state.items_of(order_id);
        let total: Money = items.iter().map(|i| i.line_total).sum();

        let order = state
            .order_mut(order_id)
            .ok_or_else(|| StoreError::not_found("order", order_id))?;
        order.total_amount = total;
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(OrderWithItems::new(order.clone(), items))
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.lock();
        let before = state.orders.len();
        state.orders.retain(|o| o.id != order_id);
        state.items.retain(|i| i.order_id != order_id);
        Ok(state.orders.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderStoreExt, StockLedgerExt};
    use common::ChangeId;

    fn widget(stock: u32) -> Product {
        Product::new("Widget", Money::from_cents(1000), stock)
    }

    #[tokio::test]
    async fn test_conditional_adjust_refuses_below_zero() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(3));

        let outcome = store
            .conditional_adjust(StockAdjustment::decrement(id, 5))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.new_stock, 3);
        assert_eq!(store.stock_of(id), Some(3));

        let outcome = store
            .conditional_adjust(StockAdjustment::decrement(id, 3))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!((outcome.previous_stock, outcome.new_stock), (3, 0));
    }

    #[tokio::test]
    async fn test_keyed_adjustment_applies_once() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(5));
        let order_id = OrderId::new();

        let first = store.reserve(order_id, id, 2).await.unwrap();
        let second = store.reserve(order_id, id, 2).await.unwrap();

        assert!(first.applied && !first.replayed);
        assert!(second.replayed);
        assert_eq!(store.stock_of(id), Some(3));

        let released = store.release_hold(order_id, id).await.unwrap();
        assert_eq!(released.change(), 2);
        let again = store.release_hold(order_id, id).await.unwrap();
        assert!(again.replayed);
        assert_eq!(store.stock_of(id), Some(5));
        assert_eq!(store.applied_adjustments(), 2);
    }

    #[tokio::test]
    async fn test_release_never_returns_units_the_order_did_not_take() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(1));
        let order_id = OrderId::new();

        let refused = store.reserve(order_id, id, 2).await.unwrap();
        assert!(!refused.applied);

        let released = store.release_hold(order_id, id).await.unwrap();
        assert_eq!(released.change(), 0);
        assert_eq!(store.stock_of(id), Some(1));
    }

    #[tokio::test]
    async fn test_released_hold_refuses_later_takes() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(5));
        let order_id = OrderId::new();

        store.release_hold(order_id, id).await.unwrap();
        let late = store.reserve(order_id, id, 2).await.unwrap();

        assert!(!late.applied && late.closed);
        assert_eq!(store.stock_of(id), Some(5));
        // Other orders are unaffected.
        assert!(store.reserve(OrderId::new(), id, 2).await.unwrap().applied);
    }

    #[tokio::test]
    async fn test_lost_response_still_applies() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(4));
        let order_id = OrderId::new();
        store.lose_adjustment_responses(id, 1);

        let err = store.reserve(order_id, id, 3).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.stock_of(id), Some(1));
        assert_eq!(store.held_by(order_id, id), 3);

        store.release_hold(order_id, id).await.unwrap();
        assert_eq!(store.stock_of(id), Some(4));
    }

    #[tokio::test]
    async fn test_refused_adjustment_does_not_record_key() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(1));
        let order_id = OrderId::new();

        let outcome = store.reserve(order_id, id, 2).await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(store.applied_adjustments(), 0);

        store
            .conditional_adjust(StockAdjustment::increment(id, 1))
            .await
            .unwrap();
        let outcome = store.reserve(order_id, id, 2).await.unwrap();
        assert!(outcome.applied && !outcome.replayed);
    }

    #[tokio::test]
    async fn test_adjust_missing_product() {
        let store = InMemoryStore::new();
        let result = store
            .conditional_adjust(StockAdjustment::increment(ProductId::new(), 1))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_injected_adjust_failures_are_transient() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(1));
        store.fail_adjustments(id, 1);

        let err = store
            .conditional_adjust(StockAdjustment::increment(id, 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.stock_of(id), Some(1));

        store
            .conditional_adjust(StockAdjustment::increment(id, 1))
            .await
            .unwrap();
        assert_eq!(store.stock_of(id), Some(2));
    }

    #[tokio::test]
    async fn test_cart_upsert_is_unique_per_product() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let product = ProductId::new();

        let line = CartLine::new(user, product, 1, Money::from_cents(100)).unwrap();
        store.upsert_line(line).await.unwrap();
        let line = CartLine::new(user, product, 4, Money::from_cents(120)).unwrap();
        store.upsert_line(line).await.unwrap();

        let lines = store.list_lines(user).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 4);

        assert!(store.remove_line(user, product).await.unwrap());
        assert!(!store.remove_line(user, product).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_only_touches_one_user() {
        let store = InMemoryStore::new();
        let alice = UserId::new();
        let bob = UserId::new();
        for user in [alice, alice, bob] {
            let line = CartLine::new(user, ProductId::new(), 1, Money::zero()).unwrap();
            store.upsert_line(line).await.unwrap();
        }

        assert_eq!(store.delete_all(alice).await.unwrap(), 2);
        assert_eq!(store.cart_len(alice), 0);
        assert_eq!(store.cart_len(bob), 1);
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let store = InMemoryStore::new();
        let order = store
            .create_order(NewOrder::new(UserId::new(), Money::zero()))
            .await
            .unwrap();

        let confirmed = store
            .update_status(order.id, 1, OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.version, 2);

        let stale = store.update_status(order.id, 1, OrderStatus::Cancelled).await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        let current = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(current.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_create_items_and_delete_order() {
        let store = InMemoryStore::new();
        let order = store
            .create_order(NewOrder::new(UserId::new(), Money::from_cents(2000)))
            .await
            .unwrap();
        let items = vec![NewOrderItem {
            product_id: ProductId::new(),
            quantity: 2,
            unit_price: Money::from_cents(1000),
        }];
        store.create_items(order.id, items).await.unwrap();

        let view = store.get_order_with_items(order.id).await.unwrap().unwrap();
        assert!(view.check_total().is_ok());

        assert!(store.delete_order(order.id).await.unwrap());
        assert!(store.get_order(order.id).await.unwrap().is_none());
        assert!(store.items().is_empty());
    }

    #[tokio::test]
    async fn test_create_items_requires_order() {
        let store = InMemoryStore::new();
        let result = store.create_items(OrderId::new(), vec![]).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_orders_filters_and_pages() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let order = store
                .create_order(NewOrder::new(user, Money::zero()))
                .await
                .unwrap();
            ids.push(order.id);
        }
        store
            .create_order(NewOrder::new(UserId::new(), Money::zero()))
            .await
            .unwrap();
        store.force_status(ids[0], OrderStatus::Cancelled);

        let page = store
            .list_orders(&OrderQuery::for_user(user).paged(1, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[2]);
        assert!(page.has_next());

        let cancelled = store
            .list_orders(&OrderQuery::for_user(user).with_status(OrderStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(cancelled.total, 1);
        assert_eq!(cancelled.items[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_reinstate_retakes_exactly_the_release() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(5));
        let order_id = OrderId::new();

        store.reserve(order_id, id, 2).await.unwrap();
        store
            .amend(order_id, id, ChangeId::new(), AdjustmentKind::Amend, 1)
            .await
            .unwrap();
        assert_eq!(store.held_by(order_id, id), 3);

        store.release_hold(order_id, id).await.unwrap();
        assert_eq!(store.stock_of(id), Some(5));

        let reinstated = store.reinstate_hold(order_id, id).await.unwrap();
        assert!(reinstated.applied && !reinstated.replayed);
        assert_eq!(store.stock_of(id), Some(2));
        assert_eq!(store.held_by(order_id, id), 3);
        assert!(store.reinstate_hold(order_id, id).await.unwrap().replayed);
    }

    #[tokio::test]
    async fn test_reinstate_without_release_is_a_no_op() {
        let store = InMemoryStore::new();
        let id = store.seed_product(widget(5));

        let outcome = store.reinstate_hold(OrderId::new(), id).await.unwrap();
        assert_eq!(outcome.change(), 0);
        assert_eq!(store.applied_adjustments(), 0);
    }

    #[tokio::test]
    async fn test_amend_items_rewrites_total_under_version_check() {
        let store = InMemoryStore::new();
        let order = store
            .create_order(NewOrder::new(UserId::new(), Money::from_cents(2000)))
            .await
            .unwrap();
        let a = ProductId::new();
        let b = ProductId::new();
        let line = |product_id, quantity, cents| NewOrderItem {
            product_id,
            quantity,
            unit_price: Money::from_cents(cents),
        };
        store
            .create_items(order.id, vec![line(a, 2, 1000)])
            .await
            .unwrap();

        let amended = store
            .amend_items(order.id, 1, b, Some(line(b, 3, 250)))
            .await
            .unwrap();
        assert_eq!(amended.order.version, 2);
        assert_eq!(amended.order.total_amount, Money::from_cents(2750));
        assert!(amended.check_total().is_ok());

        let stale = store.amend_items(order.id, 1, a, None).await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));

        let removed = store.amend_items(order.id, 2, a, None).await.unwrap();
        assert_eq!(removed.items.len(), 1);
        assert_eq!(removed.order.total_amount, Money::from_cents(750));
    }
}