//! Checkout and order operations.
//!
//! Payment and order live in separate transactions. Once a payment is
//! recorded, order creation is retried a few times; if it still fails the
//! payment is flagged for reconciliation and the caller gets
//! `CommerceError::OrderNotRecorded`, never a success.

use std::time::Duration;

use tracing::instrument;

use bazaar_core::{OrderId, PaymentId, UserId};

use super::CommerceError;
use crate::db::{CartStore, OrderStore, PaymentLedger, RepositoryError};
use crate::models::cart::CartLine;
use crate::models::order::{CancelOutcome, Order, OrderItem};

/// Order creation attempts after a payment is recorded.
pub const ORDER_ATTEMPTS: u32 = 3;

/// Base delay between order creation attempts, multiplied by the attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Checkout service for one request.
pub struct CheckoutService<'a> {
    carts: &'a dyn CartStore,
    payments: &'a dyn PaymentLedger,
    orders: &'a dyn OrderStore,
}

impl<'a> CheckoutService<'a> {
    #[must_use]
    pub const fn new(
        carts: &'a dyn CartStore,
        payments: &'a dyn PaymentLedger,
        orders: &'a dyn OrderStore,
    ) -> Self {
        Self {
            carts,
            payments,
            orders,
        }
    }

    /// Turn the user's cart into a paid order and take the ordered items
    /// out of the cart.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::CartNotFound` or `CommerceError::CartEmpty`
    /// if there is nothing to buy (no payment is recorded then), and
    /// `CommerceError::OrderNotRecorded` if the payment went through but the
    /// order could not be stored.
    #[instrument(skip(self))]
    pub async fn checkout(&self, user_id: UserId) -> Result<Order, CommerceError> {
        let cart = self
            .carts
            .get(user_id)
            .await?
            .ok_or(CommerceError::CartNotFound)?;
        if cart.is_empty() {
            return Err(CommerceError::CartEmpty);
        }

        let items: Vec<OrderItem> = cart
            .items
            .iter()
            .map(|item| OrderItem {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        let payment = self
            .payments
            .process_payment(user_id, cart.total_amount)
            .await?;
        tracing::info!(payment_id = %payment.id, amount = %payment.amount, "Payment recorded");

        let order = self.record_order(user_id, payment.id, &items).await?;
        tracing::info!(order_id = %order.id, payment_id = %payment.id, "Order placed");

        let ordered: Vec<CartLine> = items
            .iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();
        if let Err(e) = self.carts.remove_ordered(user_id, &ordered).await {
            tracing::error!(
                order_id = %order.id,
                error = %e,
                "Failed to remove ordered items from cart"
            );
        }

        Ok(order)
    }

    /// Create the order for a recorded payment, retrying, and flag the
    /// payment if every attempt fails.
    async fn record_order(
        &self,
        user_id: UserId,
        payment_id: PaymentId,
        items: &[OrderItem],
    ) -> Result<Order, CommerceError> {
        let mut last_error: Option<RepositoryError> = None;

        for attempt in 1..=ORDER_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BACKOFF * (attempt - 1)).await;

                // A failed attempt may have committed before the error surfaced.
                match self.orders.find_by_payment(user_id, payment_id).await {
                    Ok(Some(order)) => return Ok(order),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to look up order by payment"),
                }
            }

            match self.orders.create_order(user_id, payment_id, items).await {
                Ok(order) => return Ok(order),
                Err(e) => {
                    tracing::warn!(attempt, payment_id = %payment_id, error = %e, "Order creation failed");
                    last_error = Some(e);
                }
            }
        }

        let note = last_error.map_or_else(
            || "order creation failed".to_owned(),
            |e| e.to_string(),
        );
        if let Err(e) = self
            .payments
            .flag_for_reconciliation(payment_id, &note)
            .await
        {
            tracing::error!(payment_id = %payment_id, error = %e, "Failed to flag payment");
        }
        tracing::error!(
            payment_id = %payment_id,
            user_id = %user_id,
            error = %note,
            "Payment recorded without an order, flagged for reconciliation"
        );

        Err(CommerceError::OrderNotRecorded { payment_id })
    }

    /// All orders of the user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::Repository` if the database operation fails.
    pub async fn get_orders(&self, user_id: UserId) -> Result<Vec<Order>, CommerceError> {
        Ok(self.orders.list_for_user(user_id).await?)
    }

    /// One order of the user.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::OrderNotFound` if it doesn't exist or belongs
    /// to someone else.
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, CommerceError> {
        self.orders
            .get_for_user(user_id, order_id)
            .await?
            .ok_or(CommerceError::OrderNotFound)
    }

    /// Cancel an order that is not yet terminal.
    ///
    /// # Errors
    ///
    /// Returns `CommerceError::OrderNotCancellable` if the order is already
    /// `Complete`, `Unfulfillable` or `Cancelled`, and
    /// `CommerceError::OrderNotFound` if it doesn't exist.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, CommerceError> {
        match self.orders.cancel(user_id, order_id).await? {
            CancelOutcome::Cancelled(order) => {
                tracing::info!(order_id = %order.id, "Order cancelled");
                Ok(order)
            }
            CancelOutcome::Rejected(status) => Err(CommerceError::OrderNotCancellable(status)),
            CancelOutcome::NotFound => Err(CommerceError::OrderNotFound),
        }
    }
}
