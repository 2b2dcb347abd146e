//! Order and payment domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use bazaar_core::{Money, OrderId, OrderStatus, PaymentId, PaymentStatus, ProductId, UserId};

/// A payment ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Set when checkout could not record the order this payment funded.
    pub needs_reconciliation: bool,
    pub created_at: DateTime<Utc>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub payment_id: PaymentId,
    pub status: OrderStatus,
    pub total_amount: Money,
    /// Snapshot of the cart at checkout.
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item copied from the cart at checkout, price included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Money,
}

/// Result of an attempted cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(Order),
    /// The order exists but is already in a terminal state.
    Rejected(OrderStatus),
    NotFound,
}
