//! Business logic services for storefront.
//!
//! # Services
//!
//! - `auth` - Registration, two-step login, passwords and profile
//! - `commerce` - Cart mutation, checkout and orders
//! - `notifier` - Outbound mail
//! - `tokens` - Signed session and reset tokens
//!
//! Services borrow their stores from [`crate::state::AppState`] and are
//! built per request.

pub mod auth;
pub mod commerce;
pub mod notifier;
pub mod tokens;
