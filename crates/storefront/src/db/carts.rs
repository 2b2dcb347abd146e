//! Cart repository.
//!
//! Every mutation runs in one transaction that first locks (or creates) the
//! user's `carts` row, so concurrent writers to the same cart are serialized
//! and the response is always read from the state the transaction committed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};

use bazaar_core::{CartId, Money, ProductId, UserId};

use super::RepositoryError;
use crate::models::cart::{Cart, CartItem, CartLine, SavedItem};

/// Persistence for the single active cart of each user.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// The user's cart, or `None` if they have never added anything.
    async fn get(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError>;

    /// Add `quantity` units of a product, creating the cart on first use.
    /// Adding a product already in the cart increases its quantity.
    ///
    /// Returns `RepositoryError::Conflict` if the product doesn't exist.
    async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Cart, RepositoryError>;

    /// Apply a set of absolute quantities; quantity 0 removes the product.
    ///
    /// Returns `RepositoryError::NotFound` if the user has no cart.
    async fn replace_items(
        &self,
        user_id: UserId,
        lines: &[CartLine],
    ) -> Result<Cart, RepositoryError>;

    /// Remove a product from the cart. Removing an absent product is a no-op.
    ///
    /// Returns `RepositoryError::NotFound` if the user has no cart.
    async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError>;

    /// Move a product from the cart to the user's saved items.
    ///
    /// Returns `RepositoryError::NotFound` if the user has no cart.
    async fn save_for_later(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError>;

    /// Items moved out by [`CartStore::save_for_later`], oldest first.
    async fn saved_items(&self, user_id: UserId) -> Result<Vec<SavedItem>, RepositoryError>;

    /// Take checked-out lines out of the cart, keeping the cart itself.
    ///
    /// Each line's ordered quantity is subtracted; a line drops out once
    /// nothing is left. Items added after the order was priced survive.
    async fn remove_ordered(
        &self,
        user_id: UserId,
        ordered: &[CartLine],
    ) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: i32,
    user_id: i32,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    product_id: i32,
    quantity: i32,
    price: Money,
}

#[derive(sqlx::FromRow)]
struct SavedItemRow {
    product_id: i32,
    quantity: i32,
    saved_at: DateTime<Utc>,
}

/// `PostgreSQL` implementation of [`CartStore`].
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Create the user's cart if missing and lock its row.
///
/// Two first-time writers race on the `UNIQUE (user_id)` constraint; the
/// loser's insert turns into an update of the winner's row instead of failing.
async fn ensure_cart(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<CartRow, RepositoryError> {
    let row = sqlx::query_as::<_, CartRow>(
        r"
        INSERT INTO carts (user_id)
        VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
        RETURNING id, user_id, updated_at
        ",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| RepositoryError::from_write(e, "unknown user"))?;

    Ok(row)
}

/// Lock an existing cart row.
async fn lock_cart(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<CartRow, RepositoryError> {
    sqlx::query_as::<_, CartRow>(
        r"
        UPDATE carts
        SET updated_at = NOW()
        WHERE user_id = $1
        RETURNING id, user_id, updated_at
        ",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(RepositoryError::NotFound)
}

/// Read a cart's items, priced from `products`.
async fn load_cart<'e, E>(executor: E, cart: CartRow) -> Result<Cart, RepositoryError>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, CartItemRow>(
        r"
        SELECT ci.product_id, ci.quantity, p.price
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.id ASC
        ",
    )
    .bind(cart.id)
    .fetch_all(executor)
    .await?;

    let items = rows
        .into_iter()
        .map(|r| CartItem {
            product_id: ProductId::new(r.product_id),
            quantity: r.quantity,
            unit_price: r.price,
        })
        .collect();

    Ok(Cart::new(
        CartId::new(cart.id),
        UserId::new(cart.user_id),
        items,
        cart.updated_at,
    ))
}

#[async_trait]
impl CartStore for PgCartRepository {
    async fn get(&self, user_id: UserId) -> Result<Option<Cart>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, CartRow>(
            r"
            SELECT id, user_id, updated_at
            FROM carts
            WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        let cart = load_cart(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(Some(cart))
    }

    async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Cart, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = ensure_cart(&mut tx, user_id).await?;

        sqlx::query(
            r"
            INSERT INTO cart_items (cart_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            ",
        )
        .bind(row.id)
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, "unknown product"))?;

        let cart = load_cart(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(cart)
    }

    async fn replace_items(
        &self,
        user_id: UserId,
        lines: &[CartLine],
    ) -> Result<Cart, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = lock_cart(&mut tx, user_id).await?;

        for line in lines {
            if line.quantity == 0 {
                sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
                    .bind(row.id)
                    .bind(line.product_id)
                    .execute(&mut *tx)
                    .await?;
            } else {
                sqlx::query(
                    r"
                    INSERT INTO cart_items (cart_id, product_id, quantity)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (cart_id, product_id)
                    DO UPDATE SET quantity = EXCLUDED.quantity
                    ",
                )
                .bind(row.id)
                .bind(line.product_id)
                .bind(line.quantity)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::from_write(e, "unknown product"))?;
            }
        }

        let cart = load_cart(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(cart)
    }

    async fn remove_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = lock_cart(&mut tx, user_id).await?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(row.id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;

        let cart = load_cart(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(cart)
    }

    async fn save_for_later(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Cart, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = lock_cart(&mut tx, user_id).await?;

        let moved: Option<i32> = sqlx::query_scalar(
            r"
            DELETE FROM cart_items
            WHERE cart_id = $1 AND product_id = $2
            RETURNING quantity
            ",
        )
        .bind(row.id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(quantity) = moved {
            sqlx::query(
                r"
                INSERT INTO saved_items (user_id, product_id, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id, product_id)
                DO UPDATE SET quantity = saved_items.quantity + EXCLUDED.quantity,
                              saved_at = NOW()
                ",
            )
            .bind(user_id)
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_write(e, "unknown product"))?;
        }

        let cart = load_cart(&mut *tx, row).await?;
        tx.commit().await?;

        Ok(cart)
    }

    async fn saved_items(&self, user_id: UserId) -> Result<Vec<SavedItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, SavedItemRow>(
            r"
            SELECT product_id, quantity, saved_at
            FROM saved_items
            WHERE user_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SavedItem {
                product_id: ProductId::new(r.product_id),
                quantity: r.quantity,
                saved_at: r.saved_at,
            })
            .collect())
    }

    async fn remove_ordered(
        &self,
        user_id: UserId,
        ordered: &[CartLine],
    ) -> Result<(), RepositoryError> {
        let products: Vec<i32> = ordered.iter().map(|l| l.product_id.as_i32()).collect();
        let quantities: Vec<i32> = ordered.iter().map(|l| l.quantity).collect();

        let mut tx = self.pool.begin().await?;
        let row = lock_cart(&mut tx, user_id).await?;

        // Lines that grew since checkout priced them keep the difference.
        sqlx::query(
            r"
            DELETE FROM cart_items ci
            USING UNNEST($2::int4[], $3::int4[]) AS o(product_id, quantity)
            WHERE ci.cart_id = $1
              AND ci.product_id = o.product_id
              AND ci.quantity <= o.quantity
            ",
        )
        .bind(row.id)
        .bind(&products)
        .bind(&quantities)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            UPDATE cart_items ci
            SET quantity = ci.quantity - o.quantity
            FROM UNNEST($2::int4[], $3::int4[]) AS o(product_id, quantity)
            WHERE ci.cart_id = $1
              AND ci.product_id = o.product_id
            ",
        )
        .bind(row.id)
        .bind(&products)
        .bind(&quantities)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
