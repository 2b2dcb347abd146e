//! Cart domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CartId, Money, ProductId, UserId};

/// A user's active cart.
///
/// The total is never stored; it is derived from the items and the current
/// product prices every time a cart is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    /// Items in insertion order.
    pub items: Vec<CartItem>,
    pub total_amount: Money,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Build a cart, deriving the total from its items.
    #[must_use]
    pub fn new(id: CartId, user_id: UserId, items: Vec<CartItem>, updated_at: DateTime<Utc>) -> Self {
        let total_amount = items.iter().map(CartItem::line_total).sum();
        Self {
            id,
            user_id,
            items,
            total_amount,
            updated_at,
        }
    }

    /// Returns `true` when there is nothing to buy.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Quantity of `product_id` in the cart, if present.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> Option<i32> {
        self.items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.quantity)
    }
}

/// One product line in a cart, priced at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartItem {
    pub product_id: ProductId,
    /// Always > 0.
    pub quantity: i32,
    pub unit_price: Money,
}

impl CartItem {
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// A requested `(product, quantity)` pair for a cart replacement.
/// Quantity 0 removes the product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// An item moved out of the cart by save-for-later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub saved_at: DateTime<Utc>,
}
