//! Checkout and order route handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use bazaar_core::OrderId;

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::order::Order;
use crate::state::AppState;

/// POST /api/orders - check out the current cart.
pub async fn checkout(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.checkout().checkout(user_id).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<Order>>> {
    Ok(Json(state.checkout().get_orders(user_id).await?))
}

/// GET /api/orders/{id}
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.checkout().get_order(user_id, order_id).await?))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.checkout().cancel_order(user_id, order_id).await?))
}
