//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Bodies are JSON: `{ "error": "<message>" }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::auth::AuthError;
use crate::services::commerce::CommerceError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Cart, checkout or order operation failed.
    #[error("Commerce error: {0}")]
    Commerce(#[from] CommerceError),

    /// Missing or invalid bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidEmail(_) | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
                AuthError::DuplicateEmail => StatusCode::CONFLICT,
                AuthError::InvalidCredentials
                | AuthError::ChallengeNotFound
                | AuthError::ChallengeExpired
                | AuthError::ChallengeMismatch
                | AuthError::Token(_)
                | AuthError::ResetTokenUsed => StatusCode::UNAUTHORIZED,
                AuthError::UserNotFound => StatusCode::NOT_FOUND,
                AuthError::Notification(_) => StatusCode::BAD_GATEWAY,
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Commerce(err) => match err {
                CommerceError::Validation(_) => StatusCode::BAD_REQUEST,
                CommerceError::UnknownProduct
                | CommerceError::CartNotFound
                | CommerceError::OrderNotFound => StatusCode::NOT_FOUND,
                CommerceError::OrderNotCancellable(_) => StatusCode::CONFLICT,
                CommerceError::CartEmpty => StatusCode::UNPROCESSABLE_ENTITY,
                CommerceError::OrderNotRecorded { .. } | CommerceError::Repository(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the client.
    fn public_message(&self) -> String {
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidEmail(_) => "Invalid email address".to_string(),
                AuthError::Validation(msg) => msg.clone(),
                AuthError::DuplicateEmail => {
                    "An account with this email already exists".to_string()
                }
                AuthError::InvalidCredentials => "Invalid credentials".to_string(),
                AuthError::UserNotFound => "No account with this email".to_string(),
                AuthError::ChallengeNotFound => "No pending login code".to_string(),
                AuthError::ChallengeExpired => "Login code expired".to_string(),
                AuthError::ChallengeMismatch => "Incorrect login code".to_string(),
                AuthError::Token(e) => format!("Invalid token: {e}"),
                AuthError::ResetTokenUsed => "Reset link already used".to_string(),
                AuthError::Notification(_) => "Email could not be sent".to_string(),
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    "Internal server error".to_string()
                }
            },
            Self::Commerce(err) => match err {
                CommerceError::OrderNotRecorded { payment_id } => format!(
                    "Payment {payment_id} was recorded but the order could not be placed; it has been flagged for review"
                ),
                CommerceError::Repository(_) => "Internal server error".to_string(),
                other => capitalize(&other.to_string()),
            },
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Unauthorized(msg) | Self::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bazaar_core::{OrderStatus, PaymentId};

    use super::*;
    use crate::db::RepositoryError;
    use crate::services::notifier::NotifyError;
    use crate::services::tokens::TokenError;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_auth_status_codes() {
        let cases = [
            (AuthError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::DuplicateEmail, StatusCode::CONFLICT),
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::ChallengeExpired, StatusCode::UNAUTHORIZED),
            (
                AuthError::Token(TokenError::WrongPurpose),
                StatusCode::UNAUTHORIZED,
            ),
            (AuthError::UserNotFound, StatusCode::NOT_FOUND),
            (
                AuthError::Notification(NotifyError::Delivery("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (AuthError::PasswordHash, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_commerce_status_codes() {
        let cases = [
            (CommerceError::CartNotFound, StatusCode::NOT_FOUND),
            (CommerceError::CartEmpty, StatusCode::UNPROCESSABLE_ENTITY),
            (CommerceError::OrderNotFound, StatusCode::NOT_FOUND),
            (
                CommerceError::OrderNotCancellable(OrderStatus::Complete),
                StatusCode::CONFLICT,
            ),
            (
                CommerceError::OrderNotRecorded {
                    payment_id: PaymentId::new(1),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_storage_errors_do_not_leak() {
        let err = AppError::from(CommerceError::Repository(RepositoryError::DataCorruption(
            "orders.total_amount is negative".into(),
        )));
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, body) = body_json(AppError::from(CommerceError::CartEmpty)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body, json!({ "error": "Cart is empty" }));

        let (_, body) = body_json(AppError::from(CommerceError::OrderNotCancellable(
            OrderStatus::Cancelled,
        )))
        .await;
        assert_eq!(body["error"], "Order cannot be cancelled in status cancelled");
    }
}
