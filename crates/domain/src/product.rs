//! Product rows as seen by the stock ledger.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A product with its live price and authoritative stock count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Units on hand. Never negative.
    pub stock: u32,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock,
        }
    }

    /// Builds a product from raw column values, rejecting negative stock or price.
    pub fn from_row(
        id: ProductId,
        name: String,
        price: Money,
        stock: i64,
    ) -> Result<Self, DomainError> {
        if price.is_negative() {
            return Err(DomainError::InvalidPrice { price });
        }
        let stock = u32::try_from(stock).map_err(|_| DomainError::InvalidStock {
            product_id: id,
            stock,
        })?;
        Ok(Self {
            id,
            name,
            price,
            stock,
        })
    }

    /// Returns how many units short the product is for `quantity`, if any.
    pub fn shortfall(&self, quantity: u32) -> Option<u32> {
        quantity.checked_sub(self.stock).filter(|short| *short > 0)
    }
}
