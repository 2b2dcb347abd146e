//! Authentication error types.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::notifier::NotifyError;
use crate::services::tokens::TokenError;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] bazaar_core::EmailError),

    /// Missing field or password too short.
    #[error("{0}")]
    Validation(String),

    /// Email already registered to another account.
    #[error("email already registered")]
    DuplicateEmail,

    /// Invalid credentials (wrong password or user not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// User not found.
    #[error("user not found")]
    UserNotFound,

    /// No login challenge to verify against.
    #[error("no login challenge found")]
    ChallengeNotFound,

    /// Login challenge past its expiry.
    #[error("login challenge expired")]
    ChallengeExpired,

    /// Submitted code doesn't match the latest challenge.
    #[error("login code does not match")]
    ChallengeMismatch,

    /// Bearer or reset token rejected.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Reset token was already used to change the password.
    #[error("reset token already used")]
    ResetTokenUsed,

    /// Outbound notification failed after the state change committed.
    #[error("notification failed: {0}")]
    Notification(#[from] NotifyError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}
