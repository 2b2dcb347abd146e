//! Cart route handlers. Every response carries the full cart as stored.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use bazaar_core::ProductId;

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::cart::{Cart, CartLine, SavedItem};
use crate::state::AppState;

/// Add-to-cart body.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Cart update body: absolute quantities, 0 removes.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub items: Vec<CartLine>,
}

/// GET /api/cart
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Cart>> {
    Ok(Json(state.carts().get_cart(user_id).await?))
}

/// POST /api/cart/items
pub async fn add(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Json(input): Json<AddItemRequest>,
) -> Result<Json<Cart>> {
    let cart = state
        .carts()
        .add_item(user_id, input.product_id, input.quantity)
        .await?;
    Ok(Json(cart))
}

/// PUT /api/cart/items
pub async fn update(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Json(input): Json<UpdateCartRequest>,
) -> Result<Json<Cart>> {
    Ok(Json(state.carts().update_cart(user_id, &input.items).await?))
}

/// DELETE /api/cart/items/{product}
pub async fn remove(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Path(product_id): Path<ProductId>,
) -> Result<Json<Cart>> {
    Ok(Json(state.carts().remove_item(user_id, product_id).await?))
}

/// POST /api/cart/items/{product}/save
pub async fn save_for_later(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Path(product_id): Path<ProductId>,
) -> Result<Json<Cart>> {
    Ok(Json(state.carts().save_for_later(user_id, product_id).await?))
}

/// GET /api/cart/saved
pub async fn saved(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<SavedItem>>> {
    Ok(Json(state.carts().saved_items(user_id).await?))
}
