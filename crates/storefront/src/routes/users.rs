//! Account route handlers: registration, two-step login, passwords, profile.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use bazaar_core::UserId;

use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::user::{Address, NewAddress, User};
use crate::services::auth::{LoginAck, ProfileChange, Registration, Session};
use crate::state::AppState;

/// Login form.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Second login step.
#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub user_id: UserId,
    #[serde(alias = "otp")]
    pub code: String,
}

/// Forgot-password form.
#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Reset-password form, token taken from the mailed link.
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Change-password form.
#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Plain acknowledgement.
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /api/users/register
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<Registration>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.auth().register(&input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/users/login
///
/// Only acknowledges that a code was sent; the session comes from
/// `verify-otp`.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<LoginAck>> {
    let ack = state.auth().login(&input.email, &input.password).await?;
    Ok(Json(ack))
}

/// POST /api/users/verify-otp
#[instrument(skip_all)]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(input): Json<VerifyOtpRequest>,
) -> Result<Json<Session>> {
    let session = state
        .auth()
        .verify_challenge(input.user_id, &input.code)
        .await?;
    Ok(Json(session))
}

/// POST /api/users/forgot-password
#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(input): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>> {
    state.auth().forgot_password(&input.email).await?;
    Ok(Json(MessageResponse {
        message: "Password reset link sent",
    }))
}

/// POST /api/users/reset-password
#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(input): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>> {
    state
        .auth()
        .reset_password(&input.token, &input.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}

/// POST /api/users/change-password
#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Json(input): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>> {
    state
        .auth()
        .change_password(user_id, &input.old_password, &input.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}

/// PUT /api/users/profile
pub async fn update_profile(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Json(input): Json<ProfileChange>,
) -> Result<Json<User>> {
    let user = state.auth().update_profile(user_id, &input).await?;
    Ok(Json(user))
}

/// GET /api/users/addresses
pub async fn list_addresses(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
) -> Result<Json<Vec<Address>>> {
    Ok(Json(state.auth().list_addresses(user_id).await?))
}

/// POST /api/users/addresses
pub async fn add_address(
    State(state): State<AppState>,
    RequireAuth(user_id): RequireAuth,
    Json(input): Json<NewAddress>,
) -> Result<(StatusCode, Json<Address>)> {
    let address = state.auth().add_address(user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(address)))
}
