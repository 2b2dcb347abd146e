//! Persistence for the storefront.
//!
//! # Database: `bazaar_storefront`
//!
//! ## Tables
//!
//! - `users` - Accounts, password hashes and permission tags
//! - `otps` - Login challenges
//! - `addresses` - User postal addresses
//! - `products` - Product prices (catalog CRUD lives elsewhere)
//! - `carts` / `cart_items` / `saved_items` - One cart per user
//! - `payments` - Local payment ledger
//! - `orders` / `order_items` - Placed orders
//!
//! # Stores
//!
//! Each table group is reached through a capability trait so orchestrators
//! never depend on `PostgreSQL` directly. [`Stores::postgres`] wires the
//! `PostgreSQL` implementations; [`memory`] provides the in-process ones.
//!
//! # Migrations
//!
//! Migrations live in `crates/storefront/migrations/` and are embedded in the
//! binary. They run on startup only when `STOREFRONT_RUN_MIGRATIONS=true`.

pub mod carts;
pub mod challenges;
pub mod memory;
pub mod orders;
pub mod payments;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::{CartStore, PgCartRepository};
pub use challenges::{ChallengeStore, PgChallengeRepository};
pub use orders::{OrderStore, PgOrderRepository};
pub use payments::{PaymentLedger, PgPaymentRepository};
pub use users::{CredentialStore, PgUserRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email, unknown product).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A stored number would leave its column's range.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// `numeric_value_out_of_range`
const SQLSTATE_OUT_OF_RANGE: &str = "22003";

impl RepositoryError {
    /// Classify a write error: unique and foreign key violations become
    /// `Conflict` with the given message, integer overflow becomes
    /// `OutOfRange`, anything else stays a database error.
    pub(crate) fn from_write(e: sqlx::Error, conflict: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                return Self::Conflict(conflict.to_owned());
            }
            if db_err.code().as_deref() == Some(SQLSTATE_OUT_OF_RANGE) {
                return Self::OutOfRange(db_err.message().to_owned());
            }
        }
        Self::Database(e)
    }
}

/// The full set of stores the services run against.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn CredentialStore>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub carts: Arc<dyn CartStore>,
    pub payments: Arc<dyn PaymentLedger>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    /// `PostgreSQL`-backed stores sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            challenges: Arc::new(PgChallengeRepository::new(pool.clone())),
            carts: Arc::new(PgCartRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Apply the embedded migrations.
///
/// # Errors
///
/// Returns `sqlx::migrate::MigrateError` if a migration fails or the
/// applied history diverges from the embedded set.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
