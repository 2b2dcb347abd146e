//! Status enums for orders, payments and user permissions.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// Checkout creates orders in `PaymentComplete`. The storefront itself only
/// ever moves an order to `Cancelled`; the other transitions belong to
/// fulfillment and are representable here but not driven by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PaymentComplete,
    Planning,
    Shipping,
    Complete,
    Unfulfillable,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states accept no further transitions, cancellation included.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Unfulfillable | Self::Cancelled)
    }

    /// Snake-case name, matching the database enum label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PaymentComplete => "payment_complete",
            Self::Planning => "planning",
            Self::Shipping => "shipping",
            Self::Complete => "complete",
            Self::Unfulfillable => "unfulfillable",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a payment ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Successful,
    Failed,
}

/// Permission tag attached to a user. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Buyer,
    Seller,
    Admin,
}

impl Permission {
    /// Granted to every newly registered account.
    pub const DEFAULT: Self = Self::Seller;

    /// Lowercase tag as stored in `users.permissions`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid permission: {s}")),
        }
    }
}
