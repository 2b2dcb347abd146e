//! HTTP routes for the storefront API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness
//! GET  /health/ready                    - Readiness (database reachable)
//!
//! # Users (rate limited: auth tier)
//! POST /api/users/register              - Create account, sends welcome mail
//! POST /api/users/login                 - Check password, mails login code
//! POST /api/users/verify-otp            - Trade login code for bearer token
//! POST /api/users/forgot-password       - Mail a reset link
//! POST /api/users/reset-password        - Set password from reset token
//! POST /api/users/change-password       - Change password (auth)
//! PUT  /api/users/profile               - Update name/email (auth)
//! GET  /api/users/addresses             - List addresses (auth)
//! POST /api/users/addresses             - Add address (auth)
//!
//! # Cart (auth, rate limited: api tier)
//! GET    /api/cart                      - Current cart
//! POST   /api/cart/items                - Add item
//! PUT    /api/cart/items                - Replace quantities
//! DELETE /api/cart/items/{product}      - Remove item
//! POST   /api/cart/items/{product}/save - Move item to saved-for-later
//! GET    /api/cart/saved                - Saved-for-later list
//!
//! # Orders (auth, rate limited: api tier)
//! POST /api/orders                      - Check out the cart
//! GET  /api/orders                      - Order history
//! GET  /api/orders/{id}                 - Order detail
//! POST /api/orders/{id}/cancel          - Cancel order
//! ```

pub mod cart;
pub mod orders;
pub mod users;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post, put},
};

use crate::middleware::rate_limit::RateLimiterLayer;
use crate::middleware::{api_rate_limiter, auth_rate_limiter};
use crate::state::AppState;

/// Create the user account routes router.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/verify-otp", post(users::verify_otp))
        .route("/forgot-password", post(users::forgot_password))
        .route("/reset-password", post(users::reset_password))
        .route("/change-password", post(users::change_password))
        .route("/profile", put(users::update_profile))
        .route(
            "/addresses",
            get(users::list_addresses).post(users::add_address),
        )
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", post(cart::add).put(cart::update))
        .route("/items/{product}", delete(cart::remove))
        .route("/items/{product}/save", post(cart::save_for_later))
        .route("/saved", get(cart::saved))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::checkout).get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/cancel", post(orders::cancel))
}

/// Build the full application router.
///
/// Rate limiters are attached per route group when enabled in config.
pub fn router(state: AppState) -> Router {
    let rate_limit = state.config().rate_limit;
    let tier = |layer: fn() -> Option<RateLimiterLayer>| rate_limit.then(layer).flatten();

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api/users", limited(user_routes(), tier(auth_rate_limiter)))
        .nest("/api/cart", limited(cart_routes(), tier(api_rate_limiter)))
        .nest("/api/orders", limited(order_routes(), tier(api_rate_limiter)))
        .with_state(state)
}

fn limited(routes: Router<AppState>, layer: Option<RateLimiterLayer>) -> Router<AppState> {
    match layer {
        Some(layer) => routes.layer(layer),
        None => routes,
    }
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable. Without
/// a database pool (in-memory stores) the service is always ready.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    let Some(pool) = state.pool() else {
        return StatusCode::OK;
    };

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
