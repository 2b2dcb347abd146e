//! Signed, stateless bearer tokens.
//!
//! A token is `base64url(claims JSON) "." base64url(HMAC-SHA256(claims))`.
//! Session and reset tokens are signed with different keys, and the key is
//! chosen from the purpose claimed in the payload, so a reset token can only
//! ever verify against the reset key.
//!
//! Tokens are not persisted and cannot be revoked; a leaked token stays
//! valid until it expires.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use bazaar_core::UserId;

use crate::config::TokenConfig;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a password reset token.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    PasswordReset,
}

/// Token verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not a token we issued: bad encoding, bad JSON or bad signature.
    #[error("malformed token")]
    Malformed,

    /// A valid token presented for the wrong purpose.
    #[error("token has the wrong purpose")]
    WrongPurpose,

    /// A valid token past its expiry.
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: UserId,
    iat: i64,
    exp: i64,
    purpose: TokenPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pwd: Option<String>,
}

/// The verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub user_id: UserId,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    /// Password fingerprint a reset token was issued against.
    pub password_fingerprint: Option<String>,
}

/// Issues and verifies session and reset tokens.
#[derive(Clone)]
pub struct TokenService {
    session_key: SecretString,
    reset_key: SecretString,
    session_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("session_key", &"[REDACTED]")
            .field("reset_key", &"[REDACTED]")
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

impl TokenService {
    /// Build the service from the loaded token configuration.
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            session_key: config.session_secret.clone(),
            reset_key: config.reset_secret.clone(),
            session_ttl: Duration::minutes(config.session_ttl_minutes),
        }
    }

    /// Issue a session token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the signing key is unusable.
    pub fn issue_session(&self, user_id: UserId) -> Result<String, TokenError> {
        self.issue_session_at(user_id, Utc::now())
    }

    /// Issue a session token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the signing key is unusable.
    pub fn issue_session_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.sign(&Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
            purpose: TokenPurpose::Session,
            pwd: None,
        })
    }

    /// Issue a one-hour reset token bound to the user's current password hash.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the signing key is unusable.
    pub fn issue_reset(&self, user_id: UserId, password_hash: &str) -> Result<String, TokenError> {
        self.issue_reset_at(user_id, password_hash, Utc::now())
    }

    /// Issue a reset token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the signing key is unusable.
    pub fn issue_reset_at(
        &self,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.sign(&Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + Duration::minutes(RESET_TOKEN_TTL_MINUTES)).timestamp(),
            purpose: TokenPurpose::PasswordReset,
            pwd: Some(password_fingerprint(password_hash)),
        })
    }

    /// Verify `token` for `expected` use.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed`, `TokenError::WrongPurpose` or
    /// `TokenError::Expired`, checked in that order.
    pub fn verify(&self, token: &str, expected: TokenPurpose) -> Result<VerifiedToken, TokenError> {
        self.verify_at(token, expected, Utc::now())
    }

    /// Verify `token` as of `now`.
    ///
    /// # Errors
    ///
    /// See [`TokenService::verify`].
    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, TokenError> {
        let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        // Constant-time comparison
        let mut mac = self.mac_for(claims.purpose)?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Malformed)?;

        if claims.purpose != expected {
            return Err(TokenError::WrongPurpose);
        }

        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Malformed)?;
        if now > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedToken {
            user_id: claims.sub,
            purpose: claims.purpose,
            expires_at,
            password_fingerprint: claims.pwd,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac_for(claims.purpose)?;
        mac.update(payload_b64.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{payload_b64}.{signature}"))
    }

    fn mac_for(&self, purpose: TokenPurpose) -> Result<HmacSha256, TokenError> {
        let key = match purpose {
            TokenPurpose::Session => &self.session_key,
            TokenPurpose::PasswordReset => &self.reset_key,
        };
        HmacSha256::new_from_slice(key.expose_secret().as_bytes()).map_err(|_| TokenError::Malformed)
    }
}

/// Short, non-reversible fingerprint of a password hash.
#[must_use]
pub fn password_fingerprint(password_hash: &str) -> String {
    let digest = Sha256::digest(password_hash.as_bytes());
    hex::encode(digest.get(..8).unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&TokenConfig {
            session_secret: SecretString::from("s".repeat(32)),
            reset_secret: SecretString::from("r".repeat(32)),
            session_ttl_minutes: 60,
        })
    }

    #[test]
    fn test_session_token_resolves_to_its_user() {
        let tokens = service();
        let token = tokens.issue_session(UserId::new(42)).unwrap();

        let verified = tokens.verify(&token, TokenPurpose::Session).unwrap();
        assert_eq!(verified.user_id, UserId::new(42));
        assert_ne!(verified.user_id, UserId::new(43));
    }

    #[test]
    fn test_reset_token_rejected_as_session() {
        let tokens = service();
        let token = tokens.issue_reset(UserId::new(1), "$argon2id$hash").unwrap();

        assert_eq!(
            tokens.verify(&token, TokenPurpose::Session),
            Err(TokenError::WrongPurpose)
        );
        assert!(tokens.verify(&token, TokenPurpose::PasswordReset).is_ok());
    }

    #[test]
    fn test_session_token_rejected_as_reset() {
        let tokens = service();
        let token = tokens.issue_session(UserId::new(1)).unwrap();

        assert_eq!(
            tokens.verify(&token, TokenPurpose::PasswordReset),
            Err(TokenError::WrongPurpose)
        );
    }

    #[test]
    fn test_expired_token() {
        let tokens = service();
        let issued = Utc::now() - Duration::minutes(61);
        let token = tokens.issue_session_at(UserId::new(1), issued).unwrap();

        assert_eq!(
            tokens.verify(&token, TokenPurpose::Session),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_reset_token_lifetime_is_one_hour() {
        let tokens = service();
        let now = Utc::now();
        let token = tokens.issue_reset_at(UserId::new(1), "h", now).unwrap();

        let later = now + Duration::minutes(59);
        assert!(tokens.verify_at(&token, TokenPurpose::PasswordReset, later).is_ok());

        let too_late = now + Duration::minutes(61);
        assert_eq!(
            tokens.verify_at(&token, TokenPurpose::PasswordReset, too_late),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_payload_is_malformed() {
        let tokens = service();
        let token = tokens.issue_session(UserId::new(1)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged_claims = Claims {
            sub: UserId::new(2),
            iat: 0,
            exp: i64::from(i32::MAX),
            purpose: TokenPurpose::Session,
            pwd: None,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{forged_payload}.{signature}");

        assert_eq!(
            tokens.verify(&forged, TokenPurpose::Session),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let tokens = service();
        for garbage in ["", "abc", "a.b", "not base64!.x"] {
            assert_eq!(
                tokens.verify(garbage, TokenPurpose::Session),
                Err(TokenError::Malformed)
            );
        }
    }

    #[test]
    fn test_token_from_other_key_is_malformed() {
        let other = TokenService::new(&TokenConfig {
            session_secret: SecretString::from("x".repeat(32)),
            reset_secret: SecretString::from("y".repeat(32)),
            session_ttl_minutes: 60,
        });
        let token = other.issue_session(UserId::new(1)).unwrap();

        assert_eq!(
            service().verify(&token, TokenPurpose::Session),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_reset_token_carries_password_fingerprint() {
        let tokens = service();
        let token = tokens.issue_reset(UserId::new(1), "old-hash").unwrap();
        let verified = tokens.verify(&token, TokenPurpose::PasswordReset).unwrap();

        assert_eq!(
            verified.password_fingerprint,
            Some(password_fingerprint("old-hash"))
        );
        assert_ne!(password_fingerprint("old-hash"), password_fingerprint("new-hash"));
        assert_eq!(password_fingerprint("old-hash").len(), 16);
    }
}
