//! Checkout saga coordinator.

use std::collections::HashMap;
use std::time::Instant;

use common::{OrderId, SagaId, UserId};
use domain::{CartLine, CheckoutPlan, NewOrder, Order, OrderItem, OrderStatus, OrderWithItems};
use store::{StockLedgerExt, StoreError, TableStore};

use crate::checkout;
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::guard::InFlight;
use crate::instance::SagaInstance;

/// Attempts at forcing a withdrawn order to `cancelled` when its version
/// keeps moving underneath us.
const WITHDRAW_ATTEMPTS: usize = 3;

/// Turns a user's cart into exactly one order, or leaves the system in its
/// pre-checkout state.
///
/// Steps run in the order load_cart → validate_stock → create_order →
/// create_items → reserve_stock → clear_cart. Creating the order header is
/// the commit point; any failure after it is compensated from the
/// [`SagaInstance`] record before the error is returned. The reserve step
/// ends by sealing the order with a version bump, so a cancellation from
/// another process that lands mid-checkout is detected and rolled back.
pub struct CheckoutCoordinator<S: TableStore> {
    store: S,
    config: SagaConfig,
    users_in_flight: InFlight<UserId>,
    orders_in_flight: InFlight<OrderId>,
}

impl<S: TableStore> CheckoutCoordinator<S> {
    pub fn new(store: S, config: SagaConfig) -> Self {
        Self {
            store,
            config,
            users_in_flight: InFlight::new(),
            orders_in_flight: InFlight::new(),
        }
    }

    /// Shares the per-order guard with an [`OrderLifecycle`](crate::OrderLifecycle)
    /// so an order cannot be cancelled while its checkout is still running.
    pub fn with_order_guard(mut self, orders_in_flight: InFlight<OrderId>) -> Self {
        self.orders_in_flight = orders_in_flight;
        self
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Places an order from the user's current cart.
    pub async fn place_order(&self, user_id: UserId) -> Result<OrderWithItems> {
        self.execute_saga(user_id).await.1
    }

    /// Places an order and also returns the saga record of the run.
    #[tracing::instrument(skip(self), fields(saga_type = checkout::SAGA_TYPE))]
    pub async fn execute_saga(&self, user_id: UserId) -> (SagaInstance, Result<OrderWithItems>) {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();
        let saga_id = SagaId::new();
        let mut saga = SagaInstance::default();

        let result = match self.users_in_flight.try_acquire(user_id) {
            Some(_guard) => {
                self.record(
                    &mut saga,
                    SagaEvent::saga_started(saga_id, user_id, checkout::SAGA_TYPE),
                );
                let deadline = started + self.config.timeout;
                self.run(&mut saga, user_id, deadline).await
            }
            None => Err(SagaError::Conflict(format!(
                "a checkout is already in progress for user {user_id}"
            ))),
        };

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("checkout_duration_seconds").record(duration);
        match &result {
            Ok(placed) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(
                    %saga_id,
                    order_id = %placed.order.id,
                    total = %placed.order.total_amount,
                    duration,
                    "checkout completed"
                );
            }
            Err(err) => {
                metrics::counter!("checkout_failed_total", "reason" => err.reason()).increment(1);
                tracing::warn!(%saga_id, error = %err, duration, "checkout failed");
            }
        }

        (saga, result)
    }

    async fn run(
        &self,
        saga: &mut SagaInstance,
        user_id: UserId,
        deadline: Instant,
    ) -> Result<OrderWithItems> {
        // 1. Load the cart
        self.begin(saga, checkout::STEP_LOAD_CART);
        let lines = match self.load_cart(user_id).await {
            Ok(lines) => lines,
            Err(err) => return Err(self.abort(saga, err).await),
        };
        self.record(
            saga,
            SagaEvent::step_completed(checkout::STEP_LOAD_CART, None),
        );

        // 2-3. Optimistic stock check and pricing
        self.begin(saga, checkout::STEP_VALIDATE_STOCK);
        let plan = match self.validate_stock(&lines).await {
            Ok(plan) => plan,
            Err(err) => return Err(self.abort(saga, err).await),
        };
        self.record(
            saga,
            SagaEvent::step_completed(checkout::STEP_VALIDATE_STOCK, None),
        );

        // 4. Order header (commit point). The order is guarded from the
        // moment its id exists, so no cancellation can slip in mid-checkout.
        self.begin(saga, checkout::STEP_CREATE_ORDER);
        let new_order = NewOrder::new(user_id, plan.total_amount);
        let Some(_order_guard) = self.orders_in_flight.try_acquire(new_order.id) else {
            let err = SagaError::Conflict(format!(
                "order {} is already being modified",
                new_order.id
            ));
            return Err(self.abort(saga, err).await);
        };
        let order = match self.create_order(new_order, deadline).await {
            Ok(order) => order,
            Err(err) => return Err(self.abort(saga, err).await),
        };
        self.record(
            saga,
            SagaEvent::step_completed(checkout::STEP_CREATE_ORDER, Some(order.id)),
        );

        // 5. Order items
        self.begin(saga, checkout::STEP_CREATE_ITEMS);
        let items = match self.create_items(&order, &plan, deadline).await {
            Ok(items) => items,
            Err(err) => return Err(self.abort(saga, err).await),
        };
        self.record(
            saga,
            SagaEvent::step_completed(checkout::STEP_CREATE_ITEMS, None),
        );

        // 6. Authoritative stock decrement
        self.begin(saga, checkout::STEP_RESERVE_STOCK);
        let order = match self.reserve_stock(saga, &order, &plan, deadline).await {
            Ok(sealed) => sealed,
            Err(err) => return Err(self.abort(saga, err).await),
        };
        self.record(
            saga,
            SagaEvent::step_completed(checkout::STEP_RESERVE_STOCK, None),
        );

        // 7. Best-effort cart clear
        self.begin(saga, checkout::STEP_CLEAR_CART);
        self.clear_cart(saga, user_id).await;

        self.record(saga, SagaEvent::saga_completed());
        Ok(OrderWithItems::new(order, items))
    }

    async fn load_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let lines = self.store.list_lines(user_id).await?;
        if lines.is_empty() {
            return Err(SagaError::EmptyCart);
        }
        Ok(lines)
    }

    async fn validate_stock(&self, lines: &[CartLine]) -> Result<CheckoutPlan> {
        let mut products = HashMap::with_capacity(lines.len());
        for line in lines {
            if let Some(product) = self.store.get_product(line.product_id).await? {
                products.insert(product.id, product);
            }
        }
        Ok(CheckoutPlan::build(lines, &products)?)
    }

    async fn create_order(&self, new_order: NewOrder, deadline: Instant) -> Result<Order> {
        check_deadline(deadline, checkout::STEP_CREATE_ORDER)?;
        let order = self.store.create_order(new_order).await?;
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            "order header created"
        );
        Ok(order)
    }

    async fn create_items(
        &self,
        order: &Order,
        plan: &CheckoutPlan,
        deadline: Instant,
    ) -> Result<Vec<OrderItem>> {
        check_deadline(deadline, checkout::STEP_CREATE_ITEMS)?;
        self.store
            .create_items(order.id, plan.new_items())
            .await
            .map_err(|err| SagaError::OrderItemCreation(err.to_string()))
    }

    /// Decrements stock for every line, then seals the order by bumping its
    /// version. Returns the sealed order.
    async fn reserve_stock(
        &self,
        saga: &mut SagaInstance,
        order: &Order,
        plan: &CheckoutPlan,
        deadline: Instant,
    ) -> Result<Order> {
        for line in &plan.lines {
            check_deadline(deadline, checkout::STEP_RESERVE_STOCK)?;

            self.record(
                saga,
                SagaEvent::stock_requested(line.product_id, line.quantity),
            );
            let outcome = self
                .store
                .reserve(order.id, line.product_id, line.quantity)
                .await
                .map_err(|err| match err {
                    StoreError::NotFound { .. } => SagaError::ProductNotFound(line.product_id),
                    other => SagaError::from(other),
                })?;

            if outcome.closed {
                return Err(SagaError::Conflict(format!(
                    "order {} was cancelled during checkout",
                    order.id
                )));
            }
            if !outcome.applied {
                return Err(SagaError::insufficient_stock(
                    line.product_id,
                    line.quantity,
                    outcome.new_stock,
                ));
            }

            tracing::debug!(
                product_id = %line.product_id,
                quantity = line.quantity,
                remaining = outcome.new_stock,
                replayed = outcome.replayed,
                "stock reserved"
            );
            self.record(
                saga,
                SagaEvent::stock_reserved(line.product_id, line.quantity),
            );
        }

        self.seal_order(order).await
    }

    /// Bumps the order's version while keeping it `pending`. Fails if anyone
    /// else moved the order off `pending` since its header was written.
    async fn seal_order(&self, order: &Order) -> Result<Order> {
        let sealed = self
            .config
            .retry
            .run("seal_order", || {
                self.store
                    .update_status(order.id, order.version, OrderStatus::Pending)
            })
            .await;

        match sealed {
            Ok(sealed) => Ok(sealed),
            Err(StoreError::VersionConflict { .. }) => {
                // Either an earlier attempt landed, or another writer got in.
                let current = self
                    .store
                    .get_order(order.id)
                    .await?
                    .ok_or_else(|| SagaError::not_found("order", order.id))?;
                if current.status == OrderStatus::Pending {
                    return Ok(current);
                }
                Err(SagaError::Conflict(format!(
                    "order {} became {} during checkout",
                    order.id, current.status
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn clear_cart(&self, saga: &mut SagaInstance, user_id: UserId) {
        match self
            .config
            .retry
            .run("clear_cart", || self.store.delete_all(user_id))
            .await
        {
            Ok(removed) => {
                tracing::debug!(removed, "cart cleared");
                self.record(
                    saga,
                    SagaEvent::step_completed(checkout::STEP_CLEAR_CART, None),
                );
            }
            Err(err) => {
                // The order stands; a stale cart is only a nuisance.
                metrics::counter!("cart_clear_failures_total").increment(1);
                tracing::warn!(%user_id, error = %err, "failed to clear cart after checkout");
                self.record(
                    saga,
                    SagaEvent::step_failed(checkout::STEP_CLEAR_CART, err.to_string()),
                );
            }
        }
    }

    /// Records a step failure, compensates if past the commit point, and
    /// returns the error to surface.
    async fn abort(&self, saga: &mut SagaInstance, err: SagaError) -> SagaError {
        let step = saga.current_step().unwrap_or("unknown").to_string();
        tracing::warn!(step = %step, error = %err, "saga step failed");
        self.record(saga, SagaEvent::step_failed(&step, err.to_string()));

        let err = if saga.state().needs_compensation() {
            match self.compensate(saga).await {
                Ok(()) => err,
                Err(compensation) => {
                    tracing::error!(
                        order_id = ?saga.order_id(),
                        original = %err,
                        error = %compensation,
                        "compensation incomplete"
                    );
                    compensation
                }
            }
        } else {
            err
        };

        self.record(saga, SagaEvent::saga_failed(err.to_string()));
        err
    }

    /// Runs compensating actions in reverse order of the committed steps.
    #[tracing::instrument(skip(self, saga), fields(order_id = ?saga.order_id()))]
    async fn compensate(&self, saga: &mut SagaInstance) -> Result<()> {
        let from_step = saga.failed_step().unwrap_or("unknown").to_string();
        self.record(saga, SagaEvent::compensation_started(&from_step));
        metrics::counter!("checkout_compensations_total").increment(1);

        let mut first_failure = None;
        for step in saga.steps_to_compensate() {
            let outcome = match step.as_str() {
                checkout::STEP_RESERVE_STOCK => self.release_reserved(saga).await,
                checkout::STEP_CREATE_ORDER => self.withdraw_order(saga).await,
                _ => continue,
            };
            match outcome {
                Ok(()) => {
                    self.record(saga, SagaEvent::compensation_step_completed(&step));
                }
                Err(err) => {
                    tracing::error!(step = %step, error = %err, "compensation step failed");
                    self.record(
                        saga,
                        SagaEvent::compensation_step_failed(&step, err.to_string()),
                    );
                    first_failure.get_or_insert(err);
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    /// Releases the order's hold on every product this run sent a decrement
    /// for, latest first. The ledger gives back only what actually landed.
    async fn release_reserved(&self, saga: &SagaInstance) -> Result<()> {
        let Some(order_id) = saga.order_id() else {
            return Ok(());
        };

        let mut first_failure = None;
        for request in saga.requested_stock().iter().rev() {
            let released = self
                .config
                .retry
                .run("release_stock", || {
                    self.store.release_hold(order_id, request.product_id)
                })
                .await;
            match released {
                Ok(outcome) => tracing::debug!(
                    product_id = %request.product_id,
                    released = outcome.change(),
                    replayed = outcome.replayed,
                    "reservation released"
                ),
                Err(err) => {
                    tracing::error!(
                        product_id = %request.product_id,
                        quantity = request.quantity,
                        error = %err,
                        "failed to release reserved stock"
                    );
                    first_failure.get_or_insert(SagaError::from(err));
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    /// Deletes the order header if no items exist yet, otherwise keeps the
    /// order and its items and forces it to `cancelled`.
    async fn withdraw_order(&self, saga: &SagaInstance) -> Result<()> {
        let Some(order_id) = saga.order_id() else {
            return Ok(());
        };

        if !saga.is_step_completed(checkout::STEP_CREATE_ITEMS) {
            self.config
                .retry
                .run("delete_order", || self.store.delete_order(order_id))
                .await?;
            tracing::info!(%order_id, "order header deleted");
            return Ok(());
        }

        for _ in 0..WITHDRAW_ATTEMPTS {
            let order = self
                .config
                .retry
                .run("get_order", || self.store.get_order(order_id))
                .await?
                .ok_or_else(|| SagaError::not_found("order", order_id))?;
            if order.status == OrderStatus::Cancelled {
                return Ok(());
            }

            let updated = self
                .config
                .retry
                .run("cancel_order", || {
                    self.store
                        .update_status(order_id, order.version, OrderStatus::Cancelled)
                })
                .await;
            match updated {
                Ok(_) => {
                    tracing::info!(%order_id, "order marked cancelled");
                    return Ok(());
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(SagaError::Conflict(format!(
            "order {order_id} kept changing while being withdrawn"
        )))
    }

    fn begin(&self, saga: &mut SagaInstance, step: &'static str) {
        tracing::info!(step, "saga step started");
        self.record(saga, SagaEvent::step_started(step));
    }

    fn record(&self, saga: &mut SagaInstance, event: SagaEvent) {
        let event_type = event.event_type();
        saga.apply(event);
        tracing::debug!(
            saga_id = ?saga.id(),
            order_id = ?saga.order_id(),
            event = event_type,
            "saga event"
        );
    }
}

fn check_deadline(deadline: Instant, step: &str) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(SagaError::TimedOut {
            step: step.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::SagaState;
    use common::Money;
    use domain::Product;
    use store::{CartStore, InMemoryStore, OrderStore};

    fn setup() -> (CheckoutCoordinator<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        let coordinator = CheckoutCoordinator::new(store.clone(), SagaConfig::default());
        (coordinator, store)
    }

    async fn add_to_cart(store: &InMemoryStore, user_id: UserId, product: &Product, qty: u32) {
        store
            .upsert_line(CartLine::new(user_id, product.id, qty, product.price).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let a = Product::new("A", Money::from_cents(1000), 5);
        let b = Product::new("B", Money::from_cents(500), 1);
        store.seed_product(a.clone());
        store.seed_product(b.clone());
        add_to_cart(&store, user_id, &a, 2).await;
        add_to_cart(&store, user_id, &b, 1).await;

        let (saga, result) = coordinator.execute_saga(user_id).await;
        let placed = result.unwrap();

        assert_eq!(saga.state(), SagaState::Completed);
        assert_eq!(saga.completed_steps(), &checkout::STEPS);
        assert_eq!(placed.order.status, OrderStatus::Pending);
        // Sealed: one version past the header write.
        assert_eq!(placed.order.version, 2);
        assert_eq!(placed.order.total_amount, Money::from_cents(2500));
        assert_eq!(placed.items.len(), 2);
        assert!(placed.check_total().is_ok());
        assert_eq!(store.stock_of(a.id), Some(3));
        assert_eq!(store.stock_of(b.id), Some(0));
        assert_eq!(store.cart_len(user_id), 0);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let (coordinator, store) = setup();
        let (saga, result) = coordinator.execute_saga(UserId::new()).await;

        assert!(matches!(result, Err(SagaError::EmptyCart)));
        assert_eq!(saga.state(), SagaState::Failed);
        assert_eq!(saga.failed_step(), Some(checkout::STEP_LOAD_CART));
        assert!(store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_uses_live_price_not_cart_snapshot() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let mut product = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(product.clone());
        add_to_cart(&store, user_id, &product, 2).await;

        product.price = Money::from_cents(1200);
        store.seed_product(product.clone());

        let placed = coordinator.place_order(user_id).await.unwrap();
        assert_eq!(placed.order.total_amount, Money::from_cents(2400));
        assert_eq!(placed.items[0].unit_price, Money::from_cents(1200));
    }

    #[tokio::test]
    async fn test_item_creation_failure_deletes_header() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let product = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(product.clone());
        add_to_cart(&store, user_id, &product, 1).await;
        store.set_fail_on_create_items(true);

        let (saga, result) = coordinator.execute_saga(user_id).await;

        assert!(matches!(result, Err(SagaError::OrderItemCreation(_))));
        assert_eq!(saga.state(), SagaState::Failed);
        assert!(store.orders().is_empty());
        assert_eq!(store.stock_of(product.id), Some(5));
        assert_eq!(store.cart_len(user_id), 1);
    }

    #[tokio::test]
    async fn test_concurrent_checkout_for_same_user_is_rejected() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let product = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(product.clone());
        add_to_cart(&store, user_id, &product, 1).await;

        let _busy = coordinator.users_in_flight.try_acquire(user_id).unwrap();
        let result = coordinator.place_order(user_id).await;

        assert!(matches!(result, Err(SagaError::Conflict(_))));
        assert!(store.orders().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_aborts_before_commit_point() {
        let store = InMemoryStore::new();
        let coordinator = CheckoutCoordinator::new(
            store.clone(),
            SagaConfig::default().with_timeout(Duration::ZERO),
        );
        let user_id = UserId::new();
        let product = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(product.clone());
        add_to_cart(&store, user_id, &product, 1).await;

        let result = coordinator.place_order(user_id).await;

        assert!(matches!(result, Err(SagaError::TimedOut { ref step }) if step == "create_order"));
        assert!(store.orders().is_empty());
        assert_eq!(store.stock_of(product.id), Some(5));
    }

    #[tokio::test]
    async fn test_order_guard_released_after_checkout() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let product = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(product.clone());
        add_to_cart(&store, user_id, &product, 1).await;

        let placed = coordinator.place_order(user_id).await.unwrap();

        assert!(!coordinator.orders_in_flight.is_active(placed.order.id));
        assert!(!coordinator.users_in_flight.is_active(user_id));
        assert!(store.get_order(placed.order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_decrement_with_lost_response_is_released() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let a = Product::new("A", Money::from_cents(1000), 5);
        let b = Product::new("B", Money::from_cents(500), 1);
        store.seed_product(a.clone());
        store.seed_product(b.clone());
        add_to_cart(&store, user_id, &a, 2).await;
        add_to_cart(&store, user_id, &b, 1).await;
        store.lose_adjustment_responses(b.id, 1);

        let (saga, result) = coordinator.execute_saga(user_id).await;

        assert!(matches!(result, Err(SagaError::UpstreamUnavailable(_))));
        assert_eq!(saga.reservations().len(), 1);
        assert_eq!(saga.requested_stock().len(), 2);
        assert_eq!(saga.compensation_failures(), 0);
        assert_eq!(store.stock_of(a.id), Some(5));
        assert_eq!(store.stock_of(b.id), Some(1));
        assert_eq!(store.orders()[0].status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_order_cancelled_elsewhere_mid_checkout_is_rolled_back() {
        let (coordinator, store) = setup();
        let user_id = UserId::new();
        let a = Product::new("A", Money::from_cents(1000), 5);
        store.seed_product(a.clone());
        add_to_cart(&store, user_id, &a, 2).await;
        store.set_create_order_delay(Duration::from_millis(100));

        let other_process = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let order = store.orders()[0].clone();
            // A cancellation that found no items yet, so released nothing.
            store.force_status(order.id, OrderStatus::Cancelled);
        };
        let (result, ()) = tokio::join!(coordinator.place_order(user_id), other_process);

        assert!(matches!(result, Err(SagaError::Conflict(_))));
        assert_eq!(store.stock_of(a.id), Some(5));
        assert_eq!(store.orders()[0].status, OrderStatus::Cancelled);
        assert_eq!(store.cart_len(user_id), 1);
    }
}
