//! Outbound notifications: welcome mail, login codes and reset links.
//!
//! Bodies are rendered from the plain text templates in `templates/email/`.
//! Delivery goes through the [`Notifier`] trait; [`SmtpNotifier`] sends via
//! an SMTP relay and [`RecordingNotifier`] keeps messages in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use url::Url;

use bazaar_core::Email;

use super::auth::challenge::CHALLENGE_TTL_MINUTES;
use super::tokens::RESET_TOKEN_TTL_MINUTES;
use crate::config::EmailConfig;

#[derive(Template)]
#[template(path = "email/welcome.txt")]
struct WelcomeText<'a> {
    first_name: &'a str,
    email: &'a str,
    base_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/login_code.txt")]
struct LoginCodeText<'a> {
    code: &'a str,
    ttl_minutes: i64,
}

#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetText<'a> {
    reset_url: &'a str,
    ttl_minutes: i64,
}

/// Errors that can occur when sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build the message.
    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    /// Reset link could not be built from the base URL.
    #[error("invalid link: {0}")]
    Link(#[from] url::ParseError),

    /// Delivery refused by the transport.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Sends a message to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to `to`. Returns once the transport accepted it.
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// A rendered message, ready for a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub subject: &'static str,
    pub body: String,
}

impl Mail {
    /// Welcome mail sent after registration.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Template` if rendering fails.
    pub fn welcome(first_name: &str, email: &Email, base_url: &Url) -> Result<Self, NotifyError> {
        let body = WelcomeText {
            first_name,
            email: email.as_str(),
            base_url: base_url.as_str(),
        }
        .render()?;

        Ok(Self {
            subject: "Welcome to Bazaar",
            body,
        })
    }

    /// Login code mail sent by the first login step.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Template` if rendering fails.
    pub fn login_code(code: &str) -> Result<Self, NotifyError> {
        let body = LoginCodeText {
            code,
            ttl_minutes: CHALLENGE_TTL_MINUTES,
        }
        .render()?;

        Ok(Self {
            subject: "Your login code",
            body,
        })
    }

    /// Reset link mail sent by forgot-password.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Link` if the link cannot be built, or
    /// `NotifyError::Template` if rendering fails.
    pub fn password_reset(base_url: &Url, token: &str) -> Result<Self, NotifyError> {
        let reset_url = reset_link(base_url, token)?;
        let body = PasswordResetText {
            reset_url: reset_url.as_str(),
            ttl_minutes: RESET_TOKEN_TTL_MINUTES,
        }
        .render()?;

        Ok(Self {
            subject: "Reset your password",
            body,
        })
    }
}

/// `{base_url}/reset-password?token=...`
///
/// # Errors
///
/// Returns `url::ParseError` if the base URL cannot be joined.
pub fn reset_link(base_url: &Url, token: &str) -> Result<Url, url::ParseError> {
    let mut url = base_url.join("reset-password")?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

// =============================================================================
// SMTP
// =============================================================================

/// Plain text mail over an SMTP relay (STARTTLS).
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpNotifier {
    /// Create a notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotifyError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .as_str()
                .parse()
                .map_err(|_| NotifyError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        self.mailer.send(email).await?;

        tracing::info!(subject = %subject, "Email sent successfully");
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// A message captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: Email,
    pub subject: String,
    pub body: String,
}

/// Keeps every message in memory instead of sending it.
///
/// Can be switched into a failing mode to exercise delivery errors.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentMail>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every message delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent message delivered to `to`.
    #[must_use]
    pub fn last_to(&self, to: &Email) -> Option<SentMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|m| &m.to == to)
            .cloned()
    }

    /// The login code in the most recent mail to `to`.
    #[must_use]
    pub fn last_code_for(&self, to: &Email) -> Option<String> {
        let mail = self.last_to(to)?;
        mail.body
            .split_whitespace()
            .find(|word| word.len() == 6 && word.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_owned)
    }

    /// The reset token in the most recent mail to `to`.
    #[must_use]
    pub fn last_reset_token_for(&self, to: &Email) -> Option<String> {
        let mail = self.last_to(to)?;
        let link = mail.body.split_whitespace().find(|w| w.contains("token="))?;
        let url = Url::parse(link).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("mail relay unavailable".to_owned()));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMail {
                to: to.clone(),
                subject: subject.to_owned(),
                body: body.to_owned(),
            });
        Ok(())
    }
}
