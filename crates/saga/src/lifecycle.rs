//! Order lifecycle: status transitions, cancellation and item edits.

use std::collections::BTreeSet;

use common::{ChangeId, OrderId, ProductId, UserId};
use domain::{NewOrderItem, Order, OrderQuery, OrderStatus, OrderWithItems, Page};
use store::{AdjustmentKind, OrderStoreExt, StockLedgerExt, StoreError, TableStore};

use crate::cart::positive_quantity;
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::guard::{InFlight, InFlightGuard};

/// Attempts at writing `cancelled` while other writers keep the order
/// `pending` but bump its version.
const CANCEL_ATTEMPTS: usize = 3;

/// An edit to one product's line on a pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEdit {
    /// Adds units, creating the line if needed.
    Add(u32),
    /// Sets the line's quantity.
    Set(u32),
    /// Removes the line.
    Remove,
}

impl ItemEdit {
    /// Quantity the line should end up with, given its current quantity.
    fn target(self, current: u32) -> Result<u32> {
        match self {
            ItemEdit::Add(0) | ItemEdit::Set(0) => Err(SagaError::InvalidQuantity(0)),
            ItemEdit::Add(quantity) => Ok(current.saturating_add(quantity)),
            ItemEdit::Set(quantity) => Ok(quantity),
            ItemEdit::Remove => Ok(0),
        }
    }
}

/// Validates and applies order status transitions and item edits.
///
/// Every order write is a compare-and-set on the order's version; a lost
/// race surfaces as [`SagaError::Conflict`]. Calls for the same order within
/// this process are serialized by an in-flight guard.
pub struct OrderLifecycle<S: TableStore> {
    store: S,
    config: SagaConfig,
    orders_in_flight: InFlight<OrderId>,
}

impl<S: TableStore> OrderLifecycle<S> {
    pub fn new(store: S, config: SagaConfig) -> Self {
        Self {
            store,
            config,
            orders_in_flight: InFlight::new(),
        }
    }

    /// Returns the per-order guard, for sharing with the checkout coordinator.
    pub fn order_guard(&self) -> InFlight<OrderId> {
        self.orders_in_flight.clone()
    }

    /// Cancels a pending order and gives its stock back.
    ///
    /// Stock is restored first and the status written last, so an interrupted
    /// cancellation can simply be repeated. The ledger gives back exactly the
    /// units the order still holds of each product, once.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, user_id: UserId) -> Result<OrderWithItems> {
        let _guard = self.acquire(order_id)?;

        let mut view = self.owned_view(order_id, user_id).await?;
        view.order.status.validate_cancel()?;

        let mut released = BTreeSet::new();
        for _ in 0..CANCEL_ATTEMPTS {
            for product_id in view.product_ids() {
                if !released.contains(&product_id) {
                    self.release_product(order_id, product_id).await?;
                    released.insert(product_id);
                }
            }

            let written = self
                .config
                .retry
                .run("cancel_order", || {
                    self.store
                        .update_status(order_id, view.order.version, OrderStatus::Cancelled)
                })
                .await;
            match written {
                Ok(cancelled) => {
                    metrics::counter!("order_cancellations_total").increment(1);
                    tracing::info!(%order_id, "order cancelled");
                    return Ok(OrderWithItems::new(cancelled, view.items));
                }
                Err(StoreError::VersionConflict { .. }) => {}
                Err(err) => return Err(err.into()),
            }

            view = self
                .store
                .get_order_with_items(order_id)
                .await?
                .ok_or_else(|| SagaError::not_found("order", order_id))?;
            match view.order.status {
                // Lost to a seal or an item edit; the stock is already back.
                OrderStatus::Pending => continue,
                OrderStatus::Cancelled => {
                    // Our releases were replays of the winner's.
                    return Err(SagaError::Conflict(format!(
                        "order {order_id} was cancelled concurrently"
                    )));
                }
                status => return Err(self.reinstate(order_id, &released, status).await),
            }
        }

        // The order stays pending with its hold released; repeating the
        // cancellation finishes it.
        Err(SagaError::Conflict(format!(
            "order {order_id} kept changing during cancellation"
        )))
    }

    async fn release_product(&self, order_id: OrderId, product_id: ProductId) -> Result<()> {
        let outcome = self
            .config
            .retry
            .run("release_stock", || {
                self.store.release_hold(order_id, product_id)
            })
            .await?;
        tracing::debug!(
            %product_id,
            released = outcome.change(),
            new_stock = outcome.new_stock,
            replayed = outcome.replayed,
            "stock released"
        );
        Ok(())
    }

    /// Handles a cancellation that lost its status write to a forward
    /// transition after stock had already been restored.
    async fn reinstate(
        &self,
        order_id: OrderId,
        products: &BTreeSet<ProductId>,
        status: OrderStatus,
    ) -> SagaError {
        tracing::warn!(
            %order_id,
            %status,
            "cancellation lost to a concurrent transition, reinstating stock"
        );
        for &product_id in products {
            let reinstated = self
                .config
                .retry
                .run("reinstate_stock", || {
                    self.store.reinstate_hold(order_id, product_id)
                })
                .await;
            match reinstated {
                Ok(outcome) if outcome.applied => {}
                Ok(outcome) => tracing::error!(
                    %order_id,
                    %product_id,
                    available = outcome.new_stock,
                    "released stock was sold before it could be reinstated"
                ),
                Err(err) => tracing::error!(
                    %order_id,
                    %product_id,
                    error = %err,
                    "failed to reinstate stock"
                ),
            }
        }

        SagaError::Conflict(format!(
            "order {order_id} moved to {status} during cancellation"
        ))
    }

    /// Moves an order one step forward along pending → confirmed → shipped →
    /// delivered. No stock side effects.
    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, order_id: OrderId, new_status: OrderStatus) -> Result<Order> {
        let _guard = self.acquire(order_id)?;

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| SagaError::not_found("order", order_id))?;
        order.status.validate_advance(new_status)?;

        let updated = self
            .store
            .update_status(order_id, order.version, new_status)
            .await?;

        metrics::counter!("order_transitions_total", "to" => new_status.as_str()).increment(1);
        tracing::info!(%order_id, from = %order.status, to = %new_status, "order advanced");
        Ok(updated)
    }

    /// Adds `quantity` units of a product to a pending order.
    pub async fn add_item(
        &self,
        order_id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<OrderWithItems> {
        let edit = ItemEdit::Add(positive_quantity(quantity)?);
        self.edit_item(order_id, user_id, product_id, edit).await
    }

    /// Sets the quantity of a product on a pending order.
    pub async fn set_item_quantity(
        &self,
        order_id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<OrderWithItems> {
        let edit = ItemEdit::Set(positive_quantity(quantity)?);
        self.edit_item(order_id, user_id, product_id, edit).await
    }

    /// Removes a product from a pending order.
    pub async fn remove_item(
        &self,
        order_id: OrderId,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<OrderWithItems> {
        self.edit_item(order_id, user_id, product_id, ItemEdit::Remove)
            .await
    }

    /// Applies one item edit to a pending order, moving stock by the
    /// difference and rewriting the order total.
    ///
    /// Extra units are taken before the items are written and given back if
    /// the write fails. Freed units are given back after the write. Both
    /// stock moves are keyed by a fresh [`ChangeId`], so they count towards
    /// what a later cancellation releases.
    #[tracing::instrument(skip(self))]
    pub async fn edit_item(
        &self,
        order_id: OrderId,
        user_id: UserId,
        product_id: ProductId,
        edit: ItemEdit,
    ) -> Result<OrderWithItems> {
        let _guard = self.acquire(order_id)?;

        let view = self.owned_view(order_id, user_id).await?;
        view.order.status.validate_item_edit()?;

        let current = view.quantity_of(product_id);
        if current == 0 && edit == ItemEdit::Remove {
            return Err(SagaError::not_found("order item", product_id));
        }
        let target = edit.target(current)?;
        if target == current {
            return Ok(view);
        }

        // Lines already on the order keep the price they were ordered at.
        let unit_price = match view.unit_price_of(product_id) {
            Some(price) => price,
            None => {
                self.store
                    .get_product(product_id)
                    .await?
                    .ok_or(SagaError::ProductNotFound(product_id))?
                    .price
            }
        };
        let replacement = (target > 0).then_some(NewOrderItem {
            product_id,
            quantity: target,
            unit_price,
        });

        let change_id = ChangeId::new();
        let units = i64::from(target) - i64::from(current);
        let amended = if units > 0 {
            self.take_for_edit(order_id, product_id, change_id, units)
                .await?;
            match self
                .write_items(&view.order, product_id, replacement, target)
                .await
            {
                Ok(amended) => amended,
                Err(err) => {
                    self.revert_edit(order_id, product_id, change_id, units)
                        .await;
                    return Err(err);
                }
            }
        } else {
            let amended = self
                .write_items(&view.order, product_id, replacement, target)
                .await?;
            self.give_back_for_edit(order_id, product_id, change_id, units)
                .await?;
            amended
        };

        metrics::counter!("order_item_edits_total").increment(1);
        tracing::info!(
            %order_id,
            %product_id,
            from = current,
            to = target,
            total = %amended.order.total_amount,
            "order items edited"
        );
        Ok(amended)
    }

    async fn take_for_edit(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        change_id: ChangeId,
        units: i64,
    ) -> Result<()> {
        let outcome = self
            .config
            .retry
            .run("amend_stock", || {
                self.store
                    .amend(order_id, product_id, change_id, AdjustmentKind::Amend, units)
            })
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => SagaError::ProductNotFound(product_id),
                other => SagaError::from(other),
            })?;

        if outcome.closed {
            return Err(SagaError::Conflict(format!(
                "order {order_id} no longer holds stock"
            )));
        }
        if !outcome.applied {
            return Err(SagaError::insufficient_stock(
                product_id,
                u32::try_from(units).unwrap_or(u32::MAX),
                outcome.new_stock,
            ));
        }
        Ok(())
    }

    async fn give_back_for_edit(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        change_id: ChangeId,
        units: i64,
    ) -> Result<()> {
        let given_back = self
            .config
            .retry
            .run("amend_stock", || {
                self.store
                    .amend(order_id, product_id, change_id, AdjustmentKind::Amend, units)
            })
            .await;
        if let Err(err) = given_back {
            // The units stay in the order's hold until it is cancelled.
            tracing::error!(
                %order_id,
                %product_id,
                units = -units,
                error = %err,
                "failed to give back stock freed by an item edit"
            );
            return Err(err.into());
        }
        Ok(())
    }

    async fn revert_edit(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        change_id: ChangeId,
        units: i64,
    ) {
        let reverted = self
            .config
            .retry
            .run("revert_stock", || {
                self.store
                    .amend(order_id, product_id, change_id, AdjustmentKind::Revert, -units)
            })
            .await;
        if let Err(err) = reverted {
            tracing::error!(
                %order_id,
                %product_id,
                units,
                error = %err,
                "failed to give back stock taken for an item edit"
            );
        }
    }

    /// Writes the edited line. A transient failure is checked against the
    /// stored order, since the write may have landed before the response was
    /// lost.
    async fn write_items(
        &self,
        order: &Order,
        product_id: ProductId,
        replacement: Option<NewOrderItem>,
        target: u32,
    ) -> Result<OrderWithItems> {
        let err = match self
            .store
            .amend_items(order.id, order.version, product_id, replacement)
            .await
        {
            Ok(amended) => return Ok(amended),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err.into()),
        };

        match self.store.get_order_with_items(order.id).await {
            Ok(Some(current))
                if current.order.version == order.version + 1
                    && current.quantity_of(product_id) == target =>
            {
                Ok(current)
            }
            _ => Err(err.into()),
        }
    }

    /// Returns an order with its items, if it belongs to `user_id`.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId, user_id: UserId) -> Result<OrderWithItems> {
        self.owned_view(order_id, user_id).await
    }

    /// Lists a user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        Ok(self.store.list_orders(query).await?)
    }

    async fn owned_view(&self, order_id: OrderId, user_id: UserId) -> Result<OrderWithItems> {
        // Someone else's order is reported exactly like a missing one.
        let order = self
            .store
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| SagaError::not_found("order", order_id))?;
        let items = self.store.list_items(order_id).await?;
        Ok(OrderWithItems::new(order, items))
    }

    fn acquire(&self, order_id: OrderId) -> Result<InFlightGuard<OrderId>> {
        self.orders_in_flight.try_acquire(order_id).ok_or_else(|| {
            SagaError::Conflict(format!("order {order_id} is already being modified"))
        })
    }
}
