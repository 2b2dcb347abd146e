//! Authentication service.
//!
//! Two-step login: [`AuthService::login`] checks the password and mails a
//! one-time code, [`AuthService::verify_challenge`] trades that code for a
//! session token. Password reset goes through a signed reset token mailed by
//! [`AuthService::forgot_password`].
//!
//! Notifications are sent after the state change is stored. A failed send is
//! still reported to the caller, but never undoes the change.

pub mod challenge;
mod error;
pub mod password;

pub use challenge::{ChallengeIssuer, CodeGenerator};
pub use error::AuthError;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use bazaar_core::{Email, Permission, UserId};

use crate::db::{CredentialStore, RepositoryError};
use crate::models::user::{Address, NewAddress, NewUser, ProfileUpdate, User};
use crate::services::notifier::{Mail, Notifier};
use crate::services::tokens::{TokenPurpose, TokenService, password_fingerprint};

use password::{DUMMY_HASH, hash_password, validate_password, verify_password};

/// Input for [`AuthService::register`].
#[derive(Clone, Deserialize)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Input for [`AuthService::update_profile`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileChange {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Returned by [`AuthService::login`]: a code was sent, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginAck {
    pub user_id: UserId,
    pub challenge_sent: bool,
}

/// Returned by [`AuthService::verify_challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: UserId,
    pub token: String,
}

/// Authentication service.
///
/// Borrows its collaborators for the duration of one request.
pub struct AuthService<'a> {
    users: &'a dyn CredentialStore,
    challenges: ChallengeIssuer<'a>,
    tokens: &'a TokenService,
    notifier: &'a dyn Notifier,
    base_url: &'a Url,
}

impl<'a> AuthService<'a> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(
        users: &'a dyn CredentialStore,
        challenges: ChallengeIssuer<'a>,
        tokens: &'a TokenService,
        notifier: &'a dyn Notifier,
        base_url: &'a Url,
    ) -> Self {
        Self {
            users,
            challenges,
            tokens,
            notifier,
            base_url,
        }
    }

    // =========================================================================
    // Registration and login
    // =========================================================================

    /// Register a new user and send the welcome mail.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for blank names or a short password,
    /// `AuthError::InvalidEmail` for a malformed email,
    /// `AuthError::DuplicateEmail` if the email is taken, and
    /// `AuthError::Notification` if the account was created but the welcome
    /// mail could not be sent.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: &Registration) -> Result<User, AuthError> {
        require("first_name", &input.first_name)?;
        require("last_name", &input.last_name)?;
        let email = Email::parse(&input.email)?;
        validate_password(&input.password)?;

        let new_user = NewUser {
            first_name: input.first_name.trim().to_owned(),
            last_name: input.last_name.trim().to_owned(),
            email,
            password_hash: hash_password(&input.password)?,
            permissions: BTreeSet::from([Permission::DEFAULT]),
        };

        let user = self.users.create(&new_user).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => AuthError::DuplicateEmail,
            other => AuthError::Repository(other),
        })?;
        tracing::info!(user_id = %user.id, "User registered");

        let mail = Mail::welcome(&user.first_name, &user.email, self.base_url)?;
        self.notifier
            .send(&user.email, mail.subject, &mail.body)
            .await?;

        Ok(user)
    }

    /// First login step: check the password and mail a login code.
    ///
    /// Malformed or unknown emails and wrong passwords fail identically, and
    /// all run one Argon2 verification.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong,
    /// `AuthError::Notification` if the code could not be sent.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginAck, AuthError> {
        let Ok(email) = Email::parse(email) else {
            let _ = verify_password(DUMMY_HASH, password);
            return Err(AuthError::InvalidCredentials);
        };

        let Some((user, password_hash)) = self.users.get_password_hash(&email).await? else {
            let _ = verify_password(DUMMY_HASH, password);
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(&password_hash, password)? {
            return Err(AuthError::InvalidCredentials);
        }

        let challenge = self.challenges.issue(user.id).await?;
        let mail = Mail::login_code(&challenge.code)?;
        self.notifier
            .send(&user.email, mail.subject, &mail.body)
            .await?;
        tracing::info!(user_id = %user.id, "Login code sent");

        Ok(LoginAck {
            user_id: user.id,
            challenge_sent: true,
        })
    }

    /// Second login step: consume the code and grant a session token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ChallengeNotFound`, `AuthError::ChallengeExpired`
    /// or `AuthError::ChallengeMismatch`.
    #[instrument(skip(self, code))]
    pub async fn verify_challenge(&self, user_id: UserId, code: &str) -> Result<Session, AuthError> {
        self.challenges.verify(user_id, code).await?;
        let token = self.tokens.issue_session(user_id)?;
        tracing::info!(user_id = %user_id, "Session granted");

        Ok(Session { user_id, token })
    }

    /// Resolve a bearer token to the user it was issued for.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Token` if the token is malformed, expired or not a
    /// session token.
    pub fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        Ok(self.tokens.verify(token, TokenPurpose::Session)?.user_id)
    }

    // =========================================================================
    // Passwords
    // =========================================================================

    /// Change the password after re-checking the current one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if `old_password` is wrong,
    /// `AuthError::Validation` if `new_password` is too short.
    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: UserId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let (_, current_hash) = self
            .users
            .get_password_hash_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !verify_password(&current_hash, old_password)? {
            return Err(AuthError::InvalidCredentials);
        }

        validate_password(new_password)?;
        let new_hash = hash_password(new_password)?;
        self.users.update_password(user_id, &new_hash).await?;
        tracing::info!(user_id = %user_id, "Password changed");

        Ok(())
    }

    /// Mail a password reset link.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UserNotFound` if the email is unknown,
    /// `AuthError::Notification` if the link could not be sent.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        let (user, password_hash) = self
            .users
            .get_password_hash(&email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let token = self.tokens.issue_reset(user.id, &password_hash)?;
        let mail = Mail::password_reset(self.base_url, &token)?;
        self.notifier
            .send(&user.email, mail.subject, &mail.body)
            .await?;
        tracing::info!(user_id = %user.id, "Password reset link sent");

        Ok(())
    }

    /// Set a new password using a reset token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Token` if the token is invalid,
    /// `AuthError::ResetTokenUsed` if the password changed since the token was
    /// issued, `AuthError::Validation` if `new_password` is too short.
    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let claims = self.tokens.verify(token, TokenPurpose::PasswordReset)?;

        let (_, current_hash) = self
            .users
            .get_password_hash_by_id(claims.user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if claims.password_fingerprint.as_deref() != Some(password_fingerprint(&current_hash).as_str())
        {
            return Err(AuthError::ResetTokenUsed);
        }

        validate_password(new_password)?;
        let new_hash = hash_password(new_password)?;
        self.users.update_password(claims.user_id, &new_hash).await?;
        tracing::info!(user_id = %claims.user_id, "Password reset");

        Ok(())
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Update names and email. Permissions are not self-editable.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for blank names,
    /// `AuthError::DuplicateEmail` if the email belongs to someone else.
    #[instrument(skip(self, change))]
    pub async fn update_profile(
        &self,
        user_id: UserId,
        change: &ProfileChange,
    ) -> Result<User, AuthError> {
        require("first_name", &change.first_name)?;
        require("last_name", &change.last_name)?;
        let update = ProfileUpdate {
            first_name: change.first_name.trim().to_owned(),
            last_name: change.last_name.trim().to_owned(),
            email: Email::parse(&change.email)?,
        };

        self.users
            .update_profile(user_id, &update)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::DuplicateEmail,
                RepositoryError::NotFound => AuthError::UserNotFound,
                other => AuthError::Repository(other),
            })
    }

    /// Add a postal address.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` if any field is blank.
    pub async fn add_address(
        &self,
        user_id: UserId,
        address: &NewAddress,
    ) -> Result<Address, AuthError> {
        if let Some(field) = address.first_blank_field() {
            return Err(AuthError::Validation(format!("{field} is required")));
        }

        self.users
            .add_address(user_id, address)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserNotFound,
                other => AuthError::Repository(other),
            })
    }

    /// All addresses of a user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Repository` if the database operation fails.
    pub async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>, AuthError> {
        Ok(self.users.list_addresses(user_id).await?)
    }
}

fn require(field: &str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::Validation(format!("{field} is required")));
    }
    Ok(())
}
