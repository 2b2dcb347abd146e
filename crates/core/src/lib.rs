//! Bazaar Core - Shared types library.
//!
//! Types shared by the storefront service and its test harness:
//! - typed entity IDs so a `CartId` can never be passed where an `OrderId` is expected
//! - a validated [`Email`] newtype
//! - [`Money`] amounts backed by decimal arithmetic
//! - order, payment and permission enums
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP
//! clients. Database encoding is opt-in through the `postgres` feature.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
