use async_trait::async_trait;
use common::{Money, OrderId, OrderItemId, ProductId, UserId};
use domain::{
    CartLine, DomainError, NewOrder, NewOrderItem, Order, OrderItem, OrderQuery, OrderStatus,
    OrderWithItems, Page, Product,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AdjustOutcome, AdjustmentKey, AdjustmentKind, CartStore, OrderStore, Result, StockAdjustment,
    StockLedger, StoreError, held_units,
};

const ORDER_COLUMNS: &str =
    "id, order_number, user_id, total_amount, status, version, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, price, line_total";

/// PostgreSQL-backed table store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product::from_row(
            ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            row.try_get("name")?,
            Money::new(row.try_get::<Decimal, _>("price")?),
            row.try_get::<i64, _>("stock")?,
        )?)
    }

    fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
        Ok(CartLine::from_row(
            UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            row.try_get::<i64, _>("quantity")?,
            Money::new(row.try_get::<Decimal, _>("price")?),
        )?)
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let order = Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            total_amount: Money::new(row.try_get::<Decimal, _>("total_amount")?),
            status: status.parse()?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        order.validate()?;
        Ok(order)
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i64 = row.try_get("quantity")?;
        let item = OrderItem {
            id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| DomainError::InvalidQuantity { quantity })?,
            unit_price: Money::new(row.try_get::<Decimal, _>("price")?),
            line_total: Money::new(row.try_get::<Decimal, _>("line_total")?),
        };
        item.validate()?;
        Ok(item)
    }

    fn stock_to_u32(product_id: ProductId, stock: i64) -> Result<u32> {
        u32::try_from(stock)
            .map_err(|_| StoreError::Decode(DomainError::InvalidStock { product_id, stock }))
    }

    /// Locks the product row for the rest of the transaction and returns its
    /// stock. Every ledger write goes through this, so writes for the same
    /// product are serialized.
    async fn lock_product(
        tx: &mut Transaction<'_, Postgres>,
        product_id: ProductId,
    ) -> Result<u32> {
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM product WHERE id = $1 FOR UPDATE")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        let stock = stock.ok_or_else(|| StoreError::not_found("product", product_id))?;
        Self::stock_to_u32(product_id, stock)
    }

    /// Applied keyed adjustments of one (order, product) pair.
    async fn adjustments_of(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT kind, delta FROM stock_adjustments WHERE order_id = $1 AND product_id = $2",
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("kind")?, row.try_get("delta")?)))
            .collect()
    }

    /// Records a keyed adjustment and moves the stock by its delta.
    async fn record_and_apply(
        tx: &mut Transaction<'_, Postgres>,
        key: AdjustmentKey,
        delta: i64,
    ) -> Result<u32> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (order_id, product_id, kind, change_id, delta)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(key.order_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.kind.as_str())
        .bind(change_uuid(&key))
        .bind(delta)
        .execute(&mut **tx)
        .await?;

        let new_stock: i64 = sqlx::query_scalar(
            r#"
            UPDATE product
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(delta)
        .fetch_one(&mut **tx)
        .await?;
        Self::stock_to_u32(key.product_id, new_stock)
    }
}

fn change_uuid(key: &AdjustmentKey) -> Uuid {
    key.change_id.map_or(Uuid::nil(), |id| id.as_uuid())
}

fn map_unique_violation(e: sqlx::Error, what: impl Into<String>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate(what.into());
    }
    StoreError::Database(e)
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price, stock FROM product WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_product).transpose()
    }

    #[tracing::instrument(skip(self), fields(product_id = %adjustment.product_id))]
    async fn conditional_adjust(&self, adjustment: StockAdjustment) -> Result<AdjustOutcome> {
        let product_id = adjustment.product_id;
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_product(&mut tx, product_id).await?;

        if let Some(key) = adjustment.key {
            let kinds: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT kind FROM stock_adjustments
                WHERE order_id = $1 AND product_id = $2
                  AND ((kind = $3 AND change_id = $4) OR kind = 'release')
                "#,
            )
            .bind(key.order_id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(key.kind.as_str())
            .bind(change_uuid(&key))
            .fetch_all(&mut *tx)
            .await?;

            if kinds.iter().any(|kind| kind == key.kind.as_str()) {
                tx.rollback().await?;
                tracing::debug!(kind = key.kind.as_str(), "stock adjustment replayed");
                return Ok(AdjustOutcome::replayed(current));
            }
            if adjustment.needs_open_hold() && kinds.iter().any(|kind| kind == "release") {
                tx.rollback().await?;
                tracing::debug!(kind = key.kind.as_str(), "order hold already released");
                return Ok(AdjustOutcome::closed(current));
            }
        }

        let Some(next) = adjustment.apply_to(current) else {
            tx.rollback().await?;
            return Ok(AdjustOutcome::refused(current));
        };

        let new_stock = match adjustment.key {
            Some(key) => Self::record_and_apply(&mut tx, key, adjustment.delta).await?,
            None => {
                let stock: i64 = sqlx::query_scalar(
                    r#"
                    UPDATE product
                    SET stock = $2, updated_at = NOW()
                    WHERE id = $1
                    RETURNING stock
                    "#,
                )
                .bind(product_id.as_uuid())
                .bind(i64::from(next))
                .fetch_one(&mut *tx)
                .await?;
                Self::stock_to_u32(product_id, stock)?
            }
        };

        tx.commit().await?;
        Ok(AdjustOutcome::applied(current, new_stock))
    }

    #[tracing::instrument(skip(self))]
    async fn release_hold(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<AdjustOutcome> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_product(&mut tx, product_id).await?;
        let applied = Self::adjustments_of(&mut tx, order_id, product_id).await?;

        if applied.iter().any(|(kind, _)| kind == AdjustmentKind::Release.as_str()) {
            tx.rollback().await?;
            return Ok(AdjustOutcome::replayed(current));
        }

        let held = held_units(applied.iter().map(|(_, delta)| *delta));
        let key = AdjustmentKey::release(order_id, product_id);
        let new_stock = Self::record_and_apply(&mut tx, key, i64::from(held)).await?;
        tx.commit().await?;

        tracing::debug!(held, new_stock, "order hold released");
        Ok(AdjustOutcome::applied(current, new_stock))
    }

    #[tracing::instrument(skip(self))]
    async fn reinstate_hold(
        &self,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<AdjustOutcome> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_product(&mut tx, product_id).await?;
        let applied = Self::adjustments_of(&mut tx, order_id, product_id).await?;

        let delta_of = |kind: AdjustmentKind| {
            applied
                .iter()
                .find(|(k, _)| k == kind.as_str())
                .map(|(_, delta)| *delta)
        };
        if delta_of(AdjustmentKind::Reinstate).is_some() {
            tx.rollback().await?;
            return Ok(AdjustOutcome::replayed(current));
        }
        let Some(released) = delta_of(AdjustmentKind::Release) else {
            tx.rollback().await?;
            return Ok(AdjustOutcome::applied(current, current));
        };
        if i64::from(current) < released {
            tx.rollback().await?;
            return Ok(AdjustOutcome::refused(current));
        }

        let key = AdjustmentKey {
            kind: AdjustmentKind::Reinstate,
            ..AdjustmentKey::release(order_id, product_id)
        };
        let new_stock = Self::record_and_apply(&mut tx, key, -released).await?;
        tx.commit().await?;
        Ok(AdjustOutcome::applied(current, new_stock))
    }

    async fn put_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product (id, name, price, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                stock = EXCLUDED.stock,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(i64::from(product.stock))
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, format!("product name {}", product.name)))?;

        Ok(())
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn list_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, product_id, quantity, price
            FROM cart
            WHERE user_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_cart_line).collect()
    }

    async fn get_line(&self, user_id: UserId, product_id: ProductId) -> Result<Option<CartLine>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, product_id, quantity, price
            FROM cart
            WHERE user_id = $1 AND product_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_cart_line).transpose()
    }

    async fn upsert_line(&self, line: CartLine) -> Result<CartLine> {
        let row = sqlx::query(
            r#"
            INSERT INTO cart (user_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, product_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                price = EXCLUDED.price,
                updated_at = NOW()
            RETURNING user_id, product_id, quantity, price
            "#,
        )
        .bind(line.user_id.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(i64::from(line.quantity))
        .bind(line.unit_price.amount())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_cart_line(row)
    }

    async fn remove_line(&self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM cart WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }

    async fn delete_all(&self, user_id: UserId) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM cart WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(&self, new: NewOrder) -> Result<Order> {
        let sql = format!(
            r#"
            INSERT INTO orders (id, order_number, user_id, total_amount, status, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(new.id.as_uuid())
            .bind(&new.order_number)
            .bind(new.user_id.as_uuid())
            .bind(new.total_amount.amount())
            .bind(OrderStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, format!("order {}", new.order_number)))?;

        Self::row_to_order(row)
    }

    async fn create_items(
        &self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::not_found("order", order_id));
        }

        let sql = format!(
            r#"
            INSERT INTO order_items (id, order_id, product_id, quantity, price, line_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ITEM_COLUMNS}
            "#
        );

        let mut created = Vec::with_capacity(items.len());
        for item in &items {
            let item = OrderItem::from_new(order_id, item);
            let row = sqlx::query(&sql)
                .bind(item.id.as_uuid())
                .bind(order_id.as_uuid())
                .bind(item.product_id.as_uuid())
                .bind(i64::from(item.quantity))
                .bind(item.unit_price.amount())
                .bind(item.line_total.amount())
                .fetch_one(&mut *tx)
                .await?;
            created.push(Self::row_to_item(row)?);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let mut filter = String::from("WHERE user_id = $1");
        if query.status.is_some() {
            filter.push_str(" AND status = $2");
        }

        let count_sql = format!("SELECT COUNT(*) FROM orders {filter}");
        let mut count_query =
            sqlx::query_scalar::<_, i64>(&count_sql).bind(query.user_id.as_uuid());
        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let next_param = if query.status.is_some() { 3 } else { 2 };
        let list_sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders {filter} \
             ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            next_param,
            next_param + 1
        );
        let mut list_query = sqlx::query(&list_sql).bind(query.user_id.as_uuid());
        if let Some(status) = query.status {
            list_query = list_query.bind(status.as_str());
        }
        let rows = list_query
            .bind(i64::from(query.limit))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let orders = rows
            .into_iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(orders, query, u64::try_from(total).unwrap_or(0)))
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected_version: i64,
        status: OrderStatus,
    ) -> Result<Order> {
        let sql = format!(
            r#"
            UPDATE orders
            SET status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(expected_version)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Self::row_to_order(row);
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                order_id,
                expected: expected_version,
                actual,
            }),
            None => Err(StoreError::not_found("order", order_id)),
        }
    }

    async fn amend_items(
        &self,
        order_id: OrderId,
        expected_version: i64,
        product_id: ProductId,
        replacement: Option<NewOrderItem>,
    ) -> Result<OrderWithItems> {
        let mut tx = self.pool.begin().await?;

        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        match actual {
            None => return Err(StoreError::not_found("order", order_id)),
            Some(actual) if actual != expected_version => {
                return Err(StoreError::VersionConflict {
                    order_id,
                    expected: expected_version,
                    actual,
                });
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM order_items WHERE order_id = $1 AND product_id = $2")
            .bind(order_id.as_uuid())
            .bind(product_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        if let Some(item) = replacement {
            let item = OrderItem::from_new(order_id, &item);
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, price, line_total)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.amount())
            .bind(item.line_total.amount())
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!(
            r#"
            UPDATE orders
            SET total_amount = (
                    SELECT COALESCE(SUM(line_total), 0) FROM order_items WHERE order_id = $1
                ),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
        let order = Self::row_to_order(row)?;

        let items_sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let items = sqlx::query(&items_sql)
            .bind(order_id.as_uuid())
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(Self::row_to_item)
            .collect::<Result<Vec<_>>>()?;

        tx.commit().await?;
        Ok(OrderWithItems::new(order, items))
    }

    async fn delete_order(&self, order_id: OrderId) -> Result<bool> {
        // order_items rows go with the header via ON DELETE CASCADE.
        let removed = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }
}
