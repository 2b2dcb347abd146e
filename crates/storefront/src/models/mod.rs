//! Domain models for storefront.
//!
//! These are validated domain objects, separate from database row types.

pub mod cart;
pub mod challenge;
pub mod order;
pub mod user;

pub use cart::{Cart, CartItem, CartLine, SavedItem};
pub use challenge::Challenge;
pub use order::{CancelOutcome, Order, OrderItem, Payment};
pub use user::{Address, NewAddress, NewUser, ProfileUpdate, User};
