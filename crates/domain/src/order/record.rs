//! Order and order item records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderItemId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::{OrderStatus, generate_order_number};

/// An order header as stored in the `orders` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Unique, human-facing order number.
    pub order_number: String,
    pub user_id: UserId,
    /// Sum of the line totals of this order's items.
    pub total_amount: Money,
    pub status: OrderStatus,
    /// Row version, bumped on every status write. Used for compare-and-set.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the initial `pending` header for a new order.
    pub fn from_new(new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            order_number: new.order_number,
            user_id: new.user_id,
            total_amount: new.total_amount,
            status: OrderStatus::Pending,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates a header read back from the store.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.total_amount.is_negative() {
            return Err(DomainError::InvalidPrice {
                price: self.total_amount,
            });
        }
        Ok(())
    }
}

/// Data needed to insert a new order header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub total_amount: Money,
}

impl NewOrder {
    /// Creates a header with a fresh id and order number.
    pub fn new(user_id: UserId, total_amount: Money) -> Self {
        Self {
            id: OrderId::new(),
            order_number: generate_order_number(Utc::now()),
            user_id,
            total_amount,
        }
    }
}

/// Data needed to insert one order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Product price observed at order time.
    pub unit_price: Money,
}

impl NewOrderItem {
    /// Returns `quantity × unit_price`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A line item frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderItem {
    /// Materializes a new item for `order_id`.
    pub fn from_new(order_id: OrderId, new: &NewOrderItem) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            product_id: new.product_id,
            quantity: new.quantity,
            unit_price: new.unit_price,
            line_total: new.line_total(),
        }
    }

    /// Validates an item read back from the store.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        if self.unit_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                price: self.unit_price,
            });
        }
        let expected = self.unit_price.multiply(self.quantity);
        if expected != self.line_total {
            return Err(DomainError::LineTotalMismatch {
                product_id: self.product_id,
                expected,
                actual: self.line_total,
            });
        }
        Ok(())
    }
}

/// An order header together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl OrderWithItems {
    pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
        Self { order, items }
    }

    /// Sum of the items' line totals.
    pub fn items_total(&self) -> Money {
        self.items.iter().map(|item| item.line_total).sum()
    }

    /// Checks `total_amount == Σ line_total`.
    pub fn check_total(&self) -> Result<(), DomainError> {
        let expected = self.items_total();
        if expected != self.order.total_amount {
            return Err(DomainError::TotalMismatch {
                order_id: self.order.id,
                expected,
                actual: self.order.total_amount,
            });
        }
        Ok(())
    }

    /// Total units of `product_id` across this order's items.
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.items
            .iter()
            .filter(|item| item.product_id == product_id)
            .map(|item| item.quantity)
            .sum()
    }

    /// Price the order already charges for `product_id`, if it has that product.
    pub fn unit_price_of(&self, product_id: ProductId) -> Option<Money> {
        self.items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.unit_price)
    }

    /// Distinct products on this order, in a stable order.
    pub fn product_ids(&self) -> BTreeSet<ProductId> {
        self.items.iter().map(|item| item.product_id).collect()
    }
}
