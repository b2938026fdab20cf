//! Checkout planning: the side-effect free part of placing an order.

use std::collections::HashMap;

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::cart::CartLine;
use crate::error::DomainError;
use crate::order::NewOrderItem;
use crate::product::Product;

/// A cart line priced at the live product price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CheckoutLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// The snapshot an order is built from.
///
/// Built from the cart and freshly read product rows. Once built, the order's
/// correctness depends only on this plan, never on later cart state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutPlan {
    pub lines: Vec<CheckoutLine>,
    pub total_amount: Money,
}

impl CheckoutPlan {
    /// Builds a plan, performing the optimistic stock check.
    ///
    /// Fails on an empty cart, a missing product or a line whose quantity
    /// exceeds the product's current stock. Prices come from `products`, not
    /// from the cart's snapshot.
    pub fn build(
        cart: &[CartLine],
        products: &HashMap<ProductId, Product>,
    ) -> Result<Self, DomainError> {
        if cart.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        let mut lines = Vec::with_capacity(cart.len());
        for line in cart {
            let product = products
                .get(&line.product_id)
                .ok_or(DomainError::ProductNotFound(line.product_id))?;

            if product.shortfall(line.quantity).is_some() {
                return Err(DomainError::InsufficientStock {
                    product_id: product.id,
                    requested: line.quantity,
                    available: product.stock,
                });
            }

            lines.push(CheckoutLine {
                product_id: product.id,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        let total_amount = lines.iter().map(CheckoutLine::line_total).sum();
        Ok(Self {
            lines,
            total_amount,
        })
    }

    /// Items to insert for the order, one per line.
    pub fn new_items(&self) -> Vec<NewOrderItem> {
        self.lines
            .iter()
            .map(|line| NewOrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect()
    }

    /// Total units across all lines.
    pub fn unit_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}
