use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Address, CartLine, CartLineId, CartSnapshotLine, Money, NewOrder, NewOrderItem, NewProduct,
    Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductId, Result, StatusChange,
    StoreError, UserId,
    store::{Store, StoreTx},
};

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, subtotal_cents, tax_cents, \
     shipping_cents, total_cents, shipping_address, billing_address, notes, created_at, updated_at";

const ORDER_ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, product_sku, quantity, \
     price_cents, subtotal_cents, created_at";

const CART_LINE_COLUMNS: &str = "id, user_id, product_id, quantity, created_at, updated_at";

/// PostgreSQL-backed store implementation.
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

    async fn attach_items(&self, mut orders: Vec<Order>) -> Result<Vec<Order>> {
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY seq ASC"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let item = row_to_order_item(row)?;
            by_order.entry(item.order_id).or_default().push(item);
        }
        for order in &mut orders {
            order.items = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }
}

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::OutOfRange {
        field: "quantity",
        value: i64::from(quantity),
    })
}

fn from_db_quantity(quantity: i32) -> Result<u32> {
    u32::try_from(quantity).map_err(|_| StoreError::OutOfRange {
        field: "quantity",
        value: i64::from(quantity),
    })
}

fn parse_status(raw: String) -> Result<OrderStatus> {
    raw.parse().map_err(|e| {
        StoreError::Serialization(serde_json::Error::io(std::io::Error::other(e)))
    })
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_cart_line(row: PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_snapshot_line(row: PgRow) -> Result<CartSnapshotLine> {
    Ok(CartSnapshotLine {
        line_id: CartLineId::from_uuid(row.try_get("line_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        product_name: row.try_get("product_name")?,
        product_sku: row.try_get("product_sku")?,
        unit_price: Money::from_cents(row.try_get("price_cents")?),
        available: from_db_quantity(row.try_get("available")?)?,
        is_active: row.try_get("is_active")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let shipping_address: Json<Address> = row.try_get("shipping_address")?;
    let billing_address: Json<Address> = row.try_get("billing_address")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        order_number: row.try_get("order_number")?,
        status: parse_status(row.try_get("status")?)?,
        subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        tax: Money::from_cents(row.try_get("tax_cents")?),
        shipping: Money::from_cents(row.try_get("shipping_cents")?),
        total: Money::from_cents(row.try_get("total_cents")?),
        shipping_address: shipping_address.0,
        billing_address: billing_address.0,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        items: Vec::new(),
    })
}

fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        product_id: row
            .try_get::<Option<Uuid>, _>("product_id")?
            .map(ProductId::from_uuid),
        product_name: row.try_get("product_name")?,
        product_sku: row.try_get("product_sku")?,
        quantity: from_db_quantity(row.try_get("quantity")?)?,
        unit_price: Money::from_cents(row.try_get("price_cents")?),
        subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx> {
        Ok(PostgresTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (id, name, sku, price_cents, quantity, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, name, sku, price_cents, quantity, is_active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&product.name)
        .bind(&product.sku)
        .bind(product.price.cents())
        .bind(to_db_quantity(product.quantity)?)
        .bind(product.is_active)
        .fetch_one(&self.pool)
        .await?;

        row_to_product(row)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, sku, price_cents, quantity, is_active, created_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn delete_product(&self, product_id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cart_snapshot(&self, user_id: UserId) -> Result<Vec<CartSnapshotLine>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS line_id, c.product_id, c.quantity,
                   p.name AS product_name, p.sku AS product_sku, p.price_cents,
                   p.quantity AS available, p.is_active
            FROM cart_items c
            JOIN products p ON p.id = c.product_id
            WHERE c.user_id = $1
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_snapshot_line).collect()
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_items (id, user_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT unique_cart_user_product DO UPDATE SET
                quantity = cart_items.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            RETURNING {CART_LINE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(to_db_quantity(quantity)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                tracing::debug!(%product_id, "cart add references a missing product");
                return StoreError::ProductNotFound(product_id);
            }
            StoreError::Database(e)
        })?;

        row_to_cart_line(row)
    }

    async fn get_cart_line(
        &self,
        user_id: UserId,
        line_id: CartLineId,
    ) -> Result<Option<CartLine>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_LINE_COLUMNS} FROM cart_items WHERE id = $1 AND user_id = $2"
        ))
        .bind(line_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_cart_line).transpose()
    }

    async fn set_cart_line_quantity(
        &self,
        user_id: UserId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE cart_items SET quantity = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING {CART_LINE_COLUMNS}
            "#
        ))
        .bind(line_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(to_db_quantity(quantity)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_cart_line).transpose()
    }

    async fn delete_cart_line(&self, user_id: UserId, line_id: CartLineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
            .bind(line_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_orders(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Order>, u64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        let orders = rows
            .into_iter()
            .map(row_to_order)
            .collect::<Result<Vec<_>>>()?;
        let orders = self.attach_items(orders).await?;

        Ok((orders, total.max(0) as u64))
    }

    async fn find_order(&self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let order = row_to_order(row)?;
                Ok(self.attach_items(vec![order]).await?.pop())
            }
            None => Ok(None),
        }
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let order = row_to_order(row)?;
        let order = self
            .attach_items(vec![order])
            .await?
            .pop()
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;

        Ok(Some(StatusChange {
            previous: parse_status(previous)?,
            order,
        }))
    }
}

/// Transaction over a [`PostgresStore`]; rolled back by sqlx when dropped.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn reserve(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products SET quantity = quantity - $2, updated_at = NOW()
            WHERE id = $1 AND is_active AND quantity >= $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(to_db_quantity(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(%product_id, quantity, "guarded reservation matched no row");
            return Err(StoreError::InsufficientStock { product_id });
        }
        Ok(())
    }

    async fn release(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET quantity = quantity + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .bind(to_db_quantity(quantity)?)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let order_number = order.order_number.clone();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (id, user_id, order_number, status, subtotal_cents, tax_cents,
                                shipping_cents, total_cents, shipping_address, billing_address, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(&order.order_number)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.subtotal.cents())
        .bind(order.tax.cents())
        .bind(order.shipping.cents())
        .bind(order.total().cents())
        .bind(Json(&order.shipping_address))
        .bind(Json(&order.billing_address))
        .bind(&order.notes)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_number")
            {
                tracing::warn!(order_number = %order_number, "order number already taken");
                return StoreError::DuplicateOrderNumber(order_number);
            }
            StoreError::Database(e)
        })?;

        row_to_order(row)
    }

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: NewOrderItem,
    ) -> Result<OrderItem> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO order_items (id, order_id, product_id, product_name, product_sku,
                                     quantity, price_cents, subtotal_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ORDER_ITEM_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(order_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(&item.product_name)
        .bind(&item.product_sku)
        .bind(to_db_quantity(item.quantity)?)
        .bind(item.unit_price.cents())
        .bind(item.subtotal().cents())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_order_item(row)
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn lock_order(&mut self, user_id: UserId, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY seq ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_order_item).collect()
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transaction commit failed");
                StoreError::CommitFailed(e.to_string())
            })
    }
}
