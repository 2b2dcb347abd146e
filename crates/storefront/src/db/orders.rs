//! Order repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};

use bazaar_core::{Money, OrderId, OrderStatus, PaymentId, ProductId, UserId};

use super::RepositoryError;
use crate::models::order::{CancelOutcome, Order, OrderItem};

/// Persistence for placed orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Record an order funded by `payment_id`, in status `PaymentComplete`.
    ///
    /// Returns `RepositoryError::Conflict` if the payment already funds an
    /// order or a product doesn't exist.
    async fn create_order(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        items: &[OrderItem],
    ) -> Result<Order, RepositoryError>;

    /// The order funded by `payment_id`, if one was recorded.
    async fn find_by_payment(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// All orders of a user, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError>;

    /// One order, only if it belongs to `user_id`.
    async fn get_for_user(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Move an order to `Cancelled` unless it is already terminal.
    async fn cancel(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<CancelOutcome, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    payment_id: i32,
    status: OrderStatus,
    total_amount: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: i32,
    product_id: i32,
    quantity: i32,
    unit_price: Money,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order {
            id: OrderId::new(self.id),
            user_id: UserId::new(self.user_id),
            payment_id: PaymentId::new(self.payment_id),
            status: self.status,
            total_amount: self.total_amount,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// `PostgreSQL` implementation of [`OrderStore`].
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Attach line items to order rows, preserving row order.
async fn with_items<'e, E>(executor: E, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError>
where
    E: PgExecutor<'e>,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
    let item_rows = sqlx::query_as::<_, OrderItemRow>(
        r"
        SELECT order_id, product_id, quantity, unit_price
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY id ASC
        ",
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    let mut items: HashMap<i32, Vec<OrderItem>> = HashMap::new();
    for r in item_rows {
        items.entry(r.order_id).or_default().push(OrderItem {
            product_id: ProductId::new(r.product_id),
            quantity: r.quantity,
            unit_price: r.unit_price,
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let lines = items.remove(&row.id).unwrap_or_default();
            row.into_order(lines)
        })
        .collect())
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn create_order(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        items: &[OrderItem],
    ) -> Result<Order, RepositoryError> {
        let total: Money = items.iter().map(|i| i.unit_price.times(i.quantity)).sum();

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(
            r"
            INSERT INTO orders (user_id, payment_id, status, total_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, payment_id, status, total_amount, created_at, updated_at
            ",
        )
        .bind(user_id)
        .bind(payment_id)
        .bind(OrderStatus::PaymentComplete)
        .bind(total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, "payment already funds an order"))?;

        for item in items {
            sqlx::query(
                r"
                INSERT INTO order_items (order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(row.id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_write(e, "unknown product"))?;
        }

        tx.commit().await?;

        Ok(row.into_order(items.to_vec()))
    }

    async fn find_by_payment(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
    ) -> Result<Option<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, payment_id, status, total_amount, created_at, updated_at
            FROM orders
            WHERE payment_id = $1 AND user_id = $2
            ",
        )
        .bind(payment_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(with_items(&self.pool, rows).await?.into_iter().next())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, payment_id, status, total_amount, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY id DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        with_items(&self.pool, rows).await
    }

    async fn get_for_user(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, payment_id, status, total_amount, created_at, updated_at
            FROM orders
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(with_items(&self.pool, rows).await?.into_iter().next())
    }

    async fn cancel(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<CancelOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock first so the terminal-state check and the update see the same row.
        let status: Option<OrderStatus> = sqlx::query_scalar(
            r"
            SELECT status
            FROM orders
            WHERE id = $1 AND user_id = $2
            FOR UPDATE
            ",
        )
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Ok(CancelOutcome::NotFound);
        };

        if status.is_terminal() {
            return Ok(CancelOutcome::Rejected(status));
        }

        let row = sqlx::query_as::<_, OrderRow>(
            r"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, user_id, payment_id, status, total_amount, created_at, updated_at
            ",
        )
        .bind(order_id)
        .bind(OrderStatus::Cancelled)
        .fetch_one(&mut *tx)
        .await?;

        let mut orders = with_items(&mut *tx, vec![row]).await?;
        tx.commit().await?;

        orders
            .pop()
            .map(CancelOutcome::Cancelled)
            .ok_or(RepositoryError::NotFound)
    }
}
