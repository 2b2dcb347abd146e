//! Bazaar storefront library.
//!
//! Accounts with two-step login, carts, and checkout over a JSON API. The
//! binary in `main.rs` wires this to `PostgreSQL` and SMTP; tests run the same
//! router against [`db::memory::MemoryStore`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
