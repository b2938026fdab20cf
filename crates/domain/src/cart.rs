//! Cart lines.

use common::{Money, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// One product a user intends to buy. Unique on `(user_id, product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price snapshot taken when the line was added. Advisory only; checkout
    /// re-reads the live product price.
    pub unit_price: Money,
}

impl CartLine {
    /// Creates a cart line, rejecting a zero quantity.
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }
        if unit_price.is_negative() {
            return Err(DomainError::InvalidPrice { price: unit_price });
        }
        Ok(Self {
            user_id,
            product_id,
            quantity,
            unit_price,
        })
    }

    /// Builds a line from raw column values read from the store.
    pub fn from_row(
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<Self, DomainError> {
        let quantity = u32::try_from(quantity)
            .map_err(|_| DomainError::InvalidQuantity { quantity })?;
        Self::new(user_id, product_id, quantity, unit_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_quantity() {
        let result = CartLine::new(UserId::new(), ProductId::new(), 0, Money::from_cents(100));
        assert_eq!(result, Err(DomainError::InvalidQuantity { quantity: 0 }));
    }

    #[test]
    fn test_from_row_rejects_negative_quantity() {
        let result =
            CartLine::from_row(UserId::new(), ProductId::new(), -2, Money::from_cents(100));
        assert_eq!(result, Err(DomainError::InvalidQuantity { quantity: -2 }));
    }
}
