//! Order and order item store contract.

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderQuery, OrderStatus, OrderWithItems, Page,
};

use crate::Result;

/// Storage for order headers and their line items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a `pending` header at version 1.
    ///
    /// Fails with `Duplicate` if the id or order number is taken.
    async fn create_order(&self, new: NewOrder) -> Result<Order>;

    /// Inserts all items for an order as one batch. Either every item is
    /// stored or none is.
    async fn create_items(&self, order_id: OrderId, items: Vec<NewOrderItem>)
    -> Result<Vec<OrderItem>>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn list_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Lists a user's orders, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>>;

    /// Compare-and-set of an order's status on its version.
    ///
    /// Succeeds only if the stored version equals `expected_version`, bumping
    /// it by one. Otherwise fails with `VersionConflict` and changes nothing.
    async fn update_status(
        &self,
        order_id: OrderId,
        expected_version: i64,
        status: OrderStatus,
    ) -> Result<Order>;

    /// Replaces every item of `product_id` on an order with `replacement`
    /// (or removes them if `None`) and rewrites `total_amount` as the sum of
    /// the remaining line totals, as one batch.
    ///
    /// Compare-and-set on the order's version like
    /// [`update_status`](OrderStore::update_status); bumps it by one.
    async fn amend_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        product_id: ProductId,
        replacement: Option<NewOrderItem>,
    ) -> Result<OrderWithItems>;

    /// Deletes an order header and its items. Compensation only.
    async fn delete_order(&self, order_id: OrderId) -> Result<bool>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Loads an order together with its items.
    async fn get_order_with_items(&self, order_id: OrderId) -> Result<Option<OrderWithItems>> {
        let Some(order) = self.get_order(order_id).await? else {
            return Ok(None);
        };
        let items = self.list_items(order_id).await?;
        Ok(Some(OrderWithItems::new(order, items)))
    }
}

impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
