//! The `PostgreSQL` stores against a real database.
//!
//! These tests require:
//! - A running `PostgreSQL` database reachable through `DATABASE_URL`
//!
//! Migrations are applied on connect. Every test creates its own users and
//! products, so runs don't interfere with each other or with existing data.
//!
//! Run with: cargo test -p bazaar-integration-tests --test postgres -- --ignored

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use secrecy::SecretString;
use sqlx::PgPool;
use uuid::Uuid;

use bazaar_core::{Email, Money, OrderStatus, Permission, ProductId, UserId};
use bazaar_storefront::db::{RepositoryError, Stores, create_pool, run_migrations};
use bazaar_storefront::models::{CancelOutcome, CartLine, NewUser, OrderItem};
use bazaar_storefront::services::commerce::{CartService, CheckoutService, CommerceError};

async fn database() -> (PgPool, Stores) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&SecretString::from(url))
        .await
        .expect("Failed to connect to database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    let stores = Stores::postgres(&pool);
    (pool, stores)
}

async fn create_user(stores: &Stores) -> UserId {
    let email = Email::parse(&format!("pg-{}@example.com", Uuid::new_v4())).unwrap();
    let user = stores
        .users
        .create(&NewUser {
            first_name: "Ada".to_owned(),
            last_name: "Lovelace".to_owned(),
            email,
            password_hash: "unused".to_owned(),
            permissions: BTreeSet::from([Permission::DEFAULT]),
        })
        .await
        .expect("Failed to create user");
    user.id
}

/// Insert a product priced at 12.50.
async fn create_product(pool: &PgPool) -> ProductId {
    let id: i32 = sqlx::query_scalar(
        "INSERT INTO products (name, price) VALUES ($1, 12.50) RETURNING id",
    )
    .bind(format!("product-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("Failed to create product");
    ProductId::new(id)
}

// ============================================================================
// Carts
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_concurrent_first_adds_share_one_cart() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let product = create_product(&pool).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let carts = stores.carts.clone();
            tokio::spawn(async move { carts.add_item(user_id, product, 1).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().expect("add_item failed under contention");
    }

    let carts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM carts WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(carts, 1);

    let cart = stores.carts.get(user_id).await.unwrap().unwrap();
    assert_eq!(cart.quantity_of(product), Some(8));
    assert_eq!(cart.total_amount, Money::from_cents(8 * 1_250));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_replace_items_with_zero_removes_line() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let kept = create_product(&pool).await;
    let dropped = create_product(&pool).await;

    stores.carts.add_item(user_id, kept, 1).await.unwrap();
    stores.carts.add_item(user_id, dropped, 2).await.unwrap();

    let cart = stores
        .carts
        .replace_items(
            user_id,
            &[
                CartLine {
                    product_id: kept,
                    quantity: 3,
                },
                CartLine {
                    product_id: dropped,
                    quantity: 0,
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(cart.quantity_of(kept), Some(3));
    assert_eq!(cart.quantity_of(dropped), None);
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_quantity_overflow_is_a_validation_error() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let product = create_product(&pool).await;

    stores
        .carts
        .add_item(user_id, product, i32::MAX)
        .await
        .unwrap();
    let err = stores
        .carts
        .add_item(user_id, product, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::OutOfRange(_)), "{err:?}");

    let carts = CartService::new(stores.carts.as_ref());
    assert!(matches!(
        carts.add_item(user_id, product, 1).await,
        Err(CommerceError::Validation(_))
    ));
    let cart = carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.quantity_of(product), Some(i32::MAX));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_remove_ordered_keeps_later_additions() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let ordered = create_product(&pool).await;
    let grown = create_product(&pool).await;
    let late = create_product(&pool).await;

    stores.carts.add_item(user_id, ordered, 1).await.unwrap();
    stores.carts.add_item(user_id, grown, 2).await.unwrap();
    let lines = [
        CartLine {
            product_id: ordered,
            quantity: 1,
        },
        CartLine {
            product_id: grown,
            quantity: 2,
        },
    ];

    // Both land after checkout priced the cart.
    stores.carts.add_item(user_id, grown, 3).await.unwrap();
    stores.carts.add_item(user_id, late, 1).await.unwrap();

    stores.carts.remove_ordered(user_id, &lines).await.unwrap();

    let cart = stores.carts.get(user_id).await.unwrap().unwrap();
    assert_eq!(cart.quantity_of(ordered), None);
    assert_eq!(cart.quantity_of(grown), Some(3));
    assert_eq!(cart.quantity_of(late), Some(1));
}

// ============================================================================
// Challenges
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_consume_is_single_use() {
    let (_pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let expires_at = Utc::now() + Duration::minutes(5);

    stores
        .challenges
        .create(user_id, "111111", expires_at)
        .await
        .unwrap();
    let latest = stores
        .challenges
        .create(user_id, "222222", expires_at)
        .await
        .unwrap();
    assert_eq!(
        stores.challenges.latest(user_id).await.unwrap().unwrap().code,
        "222222"
    );

    let (first, second) = tokio::join!(
        stores.challenges.consume(&latest),
        stores.challenges.consume(&latest)
    );
    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(|consumed| *consumed)
        .count();
    assert_eq!(winners, 1);

    assert!(stores.challenges.latest(user_id).await.unwrap().is_none());
    assert!(!stores.challenges.consume(&latest).await.unwrap());
}

// ============================================================================
// Orders
// ============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_cancel_respects_terminal_states() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let other = create_user(&stores).await;
    let product = create_product(&pool).await;
    let items = [OrderItem {
        product_id: product,
        quantity: 1,
        unit_price: Money::from_cents(1_250),
    }];

    let mut orders = Vec::new();
    for _ in 0..2 {
        let payment = stores
            .payments
            .process_payment(user_id, Money::from_cents(1_250))
            .await
            .unwrap();
        orders.push(
            stores
                .orders
                .create_order(user_id, payment.id, &items)
                .await
                .unwrap(),
        );
    }
    let (open, shipped) = (orders.remove(0), orders.remove(0));

    sqlx::query("UPDATE orders SET status = 'complete' WHERE id = $1")
        .bind(shipped.id)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(
        stores.orders.cancel(user_id, shipped.id).await.unwrap(),
        CancelOutcome::Rejected(OrderStatus::Complete)
    );

    assert_eq!(
        stores.orders.cancel(other, open.id).await.unwrap(),
        CancelOutcome::NotFound
    );

    let CancelOutcome::Cancelled(cancelled) = stores.orders.cancel(user_id, open.id).await.unwrap()
    else {
        panic!("open order should cancel");
    };
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.items, items);
    assert_eq!(
        stores.orders.cancel(user_id, open.id).await.unwrap(),
        CancelOutcome::Rejected(OrderStatus::Cancelled)
    );
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (DATABASE_URL)"]
async fn test_checkout_against_postgres() {
    let (pool, stores) = database().await;
    let user_id = create_user(&stores).await;
    let product = create_product(&pool).await;
    stores.carts.add_item(user_id, product, 2).await.unwrap();

    let checkout = CheckoutService::new(
        stores.carts.as_ref(),
        stores.payments.as_ref(),
        stores.orders.as_ref(),
    );
    let order = checkout.checkout(user_id).await.unwrap();

    assert_eq!(order.status, OrderStatus::PaymentComplete);
    assert_eq!(order.total_amount, Money::from_cents(2_500));
    assert_eq!(
        stores
            .orders
            .find_by_payment(user_id, order.payment_id)
            .await
            .unwrap(),
        Some(order.clone())
    );
    assert!(stores.carts.get(user_id).await.unwrap().unwrap().is_empty());
    assert!(matches!(
        checkout.checkout(user_id).await,
        Err(CommerceError::CartEmpty)
    ));
}
