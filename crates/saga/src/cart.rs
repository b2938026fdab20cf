//! Cart service.

use common::{Money, ProductId, UserId};
use domain::{CartLine, Product};
use serde::Serialize;
use store::TableStore;

use crate::error::{Result, SagaError};

/// A user's cart with an advisory total at live prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    /// Sum of `quantity × live price`; lines whose product is gone are
    /// counted at their snapshot price.
    pub total: Money,
    /// Total units across all lines.
    pub item_count: u32,
}

/// Add/update/remove cart lines with stock checks.
pub struct CartService<S: TableStore> {
    store: S,
}

impl<S: TableStore> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds `quantity` units of a product, merging with an existing line.
    ///
    /// The merged quantity may not exceed current stock. The line's price
    /// snapshot is refreshed to the live price.
    #[tracing::instrument(skip(self))]
    pub async fn add(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartLine> {
        let quantity = positive_quantity(quantity)?;
        let product = self.product(product_id).await?;

        let existing = self
            .store
            .get_line(user_id, product_id)
            .await?
            .map_or(0, |line| line.quantity);
        let merged = existing.saturating_add(quantity);
        if product.shortfall(merged).is_some() {
            return Err(SagaError::insufficient_stock(
                product_id,
                merged,
                product.stock,
            ));
        }

        let line = CartLine::new(user_id, product_id, merged, product.price)?;
        Ok(self.store.upsert_line(line).await?)
    }

    /// Replaces the quantity of an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartLine> {
        let quantity = positive_quantity(quantity)?;
        let mut line = self
            .store
            .get_line(user_id, product_id)
            .await?
            .ok_or_else(|| SagaError::not_found("cart line", product_id))?;

        let product = self.product(product_id).await?;
        if product.shortfall(quantity).is_some() {
            return Err(SagaError::insufficient_stock(
                product_id,
                quantity,
                product.stock,
            ));
        }

        line.quantity = quantity;
        Ok(self.store.upsert_line(line).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        if !self.store.remove_line(user_id, product_id).await? {
            return Err(SagaError::not_found("cart line", product_id));
        }
        Ok(())
    }

    /// Empties the cart, returning the number of lines removed.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<usize> {
        Ok(self.store.delete_all(user_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn view(&self, user_id: UserId) -> Result<CartView> {
        let lines = self.store.list_lines(user_id).await?;

        let mut total = Money::zero();
        for line in &lines {
            let price = self
                .store
                .get_product(line.product_id)
                .await?
                .map_or(line.unit_price, |product| product.price);
            total += price.multiply(line.quantity);
        }
        let item_count = lines.iter().map(|line| line.quantity).sum();

        Ok(CartView {
            lines,
            total,
            item_count,
        })
    }

    async fn product(&self, product_id: ProductId) -> Result<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or(SagaError::ProductNotFound(product_id))
    }
}

pub(crate) fn positive_quantity(quantity: i64) -> Result<u32> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(SagaError::InvalidQuantity(quantity))
}
