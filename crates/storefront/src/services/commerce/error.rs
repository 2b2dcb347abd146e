//! Cart, checkout and order error types.

use thiserror::Error;

use bazaar_core::{OrderStatus, PaymentId};

use crate::db::RepositoryError;

/// Errors that can occur during cart and order operations.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// Malformed input (non-positive quantity and the like).
    #[error("{0}")]
    Validation(String),

    /// Product doesn't exist in the catalog.
    #[error("unknown product")]
    UnknownProduct,

    /// The user has never added anything to a cart.
    #[error("cart not found")]
    CartNotFound,

    /// The cart exists but has nothing to buy.
    #[error("cart is empty")]
    CartEmpty,

    /// Order missing or owned by someone else.
    #[error("order not found")]
    OrderNotFound,

    /// Order is already in a terminal state.
    #[error("order cannot be cancelled in status {0}")]
    OrderNotCancellable(OrderStatus),

    /// Payment recorded but the order could not be; flagged for reconciliation.
    #[error("payment {payment_id} recorded but order could not be created")]
    OrderNotRecorded { payment_id: PaymentId },

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}
