//! Payment ledger.
//!
//! Payments are local accounting entries; no gateway is involved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use bazaar_core::{Money, PaymentId, PaymentStatus, UserId};

use super::RepositoryError;
use crate::models::order::Payment;

/// Records payments against users.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Record a successful payment of `amount` by `user_id`.
    async fn process_payment(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<Payment, RepositoryError>;

    /// Mark a payment for manual reconciliation.
    ///
    /// Returns `RepositoryError::NotFound` if the payment doesn't exist.
    async fn flag_for_reconciliation(
        &self,
        payment_id: PaymentId,
        note: &str,
    ) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i32,
    user_id: i32,
    amount: Money,
    status: PaymentStatus,
    needs_reconciliation: bool,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: PaymentId::new(row.id),
            user_id: UserId::new(row.user_id),
            amount: row.amount,
            status: row.status,
            needs_reconciliation: row.needs_reconciliation,
            created_at: row.created_at,
        }
    }
}

/// `PostgreSQL` implementation of [`PaymentLedger`].
#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLedger for PgPaymentRepository {
    async fn process_payment(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> Result<Payment, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r"
            INSERT INTO payments (user_id, amount, status)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, amount, status, needs_reconciliation, created_at
            ",
        )
        .bind(user_id)
        .bind(amount)
        .bind(PaymentStatus::Successful)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "unknown user"))?;

        Ok(row.into())
    }

    async fn flag_for_reconciliation(
        &self,
        payment_id: PaymentId,
        note: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE payments
            SET needs_reconciliation = TRUE, reconciliation_note = $2
            WHERE id = $1
            ",
        )
        .bind(payment_id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
