//! Cart, checkout and order services.

mod cart;
mod checkout;
mod error;

pub use cart::CartService;
pub use checkout::{CheckoutService, ORDER_ATTEMPTS};
pub use error::CommerceError;
