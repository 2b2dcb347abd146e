//! Bearer token authentication.
//!
//! Protected handlers take a [`RequireAuth`] argument. The extractor reads
//! `Authorization: Bearer <token>`, verifies it as a session token and hands
//! the handler the user it was issued for. Any failure rejects the request
//! with 401 before the handler runs.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use bazaar_core::UserId;

use crate::error::{AppError, set_sentry_user};
use crate::services::tokens::{TokenPurpose, TokenService};
use crate::state::AppState;

/// Extractor that requires a valid session token.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(
///     RequireAuth(user_id): RequireAuth,
/// ) -> impl IntoResponse {
///     format!("Hello, user {user_id}!")
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequireAuth(pub UserId);

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = authenticate(state.tokens(), &parts.headers)?;
        set_sentry_user(&user_id);
        Ok(Self(user_id))
    }
}

/// The token of an `Authorization: Bearer` header, if present.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve request headers to the authenticated user.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` if the header is missing or the token
/// does not verify as a session token.
pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> Result<UserId, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    tokens
        .verify(token, TokenPurpose::Session)
        .map(|verified| verified.user_id)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    use super::*;
    use crate::config::TokenConfig;

    fn tokens() -> TokenService {
        TokenService::new(&TokenConfig {
            session_secret: SecretString::from("s".repeat(32)),
            reset_secret: SecretString::from("r".repeat(32)),
            session_ttl_minutes: 60,
        })
    }

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_authenticate_resolves_issuing_user() {
        let tokens = tokens();
        let token = tokens.issue_session(UserId::new(5)).unwrap();

        let user_id = authenticate(&tokens, &headers(&format!("Bearer {token}"))).unwrap();
        assert_eq!(user_id, UserId::new(5));
    }

    #[test]
    fn test_authenticate_rejects_reset_token() {
        let tokens = tokens();
        let token = tokens.issue_reset(UserId::new(5), "hash").unwrap();

        let err = authenticate(&tokens, &headers(&format!("Bearer {token}"))).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_authenticate_missing_header() {
        let err = authenticate(&tokens(), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(msg) if msg == "Missing bearer token"));
    }
}
