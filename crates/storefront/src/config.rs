//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront, used in password reset links
//! - `STOREFRONT_SESSION_SECRET` - Session token signing key (min 32 chars, high entropy)
//! - `STOREFRONT_RESET_SECRET` - Reset token signing key (min 32 chars, must differ from the session key)
//! - `SMTP_HOST` - SMTP relay host
//! - `SMTP_USERNAME` - SMTP username
//! - `SMTP_PASSWORD` - SMTP password
//! - `EMAIL_FROM` - Sender address for outbound mail
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_SESSION_TTL_MINUTES` - Session token lifetime (default: 60)
//! - `STOREFRONT_RUN_MIGRATIONS` - Apply embedded migrations on startup (default: false)
//! - `STOREFRONT_RATE_LIMIT` - Per-IP rate limiting on `/api` (default: true)
//! - `SMTP_PORT` - SMTP port (default: 587)
//! - `LOG_FORMAT` - `json` for JSON log lines, anything else for human-readable
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_SIGNING_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: Url,
    /// Token signing keys and lifetimes
    pub tokens: TokenConfig,
    /// Outbound mail configuration
    pub email: EmailConfig,
    /// Apply embedded migrations before serving
    pub run_migrations: bool,
    /// Enforce per-IP rate limits
    pub rate_limit: bool,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Signing keys for session and reset tokens.
///
/// The two keys are distinct so a reset token can never verify as a session
/// token. Implements `Debug` manually to redact both.
#[derive(Clone)]
pub struct TokenConfig {
    /// Key for session tokens
    pub session_secret: SecretString,
    /// Key for password reset tokens
    pub reset_secret: SecretString,
    /// Lifetime of a session token in minutes
    pub session_ttl_minutes: i64,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("session_secret", &"[REDACTED]")
            .field("reset_secret", &"[REDACTED]")
            .field("session_ttl_minutes", &self.session_ttl_minutes)
            .finish()
    }
}

/// SMTP configuration for the notifier.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP relay host
    pub smtp_host: String,
    /// SMTP port (STARTTLS)
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_username: String,
    /// SMTP password
    pub smtp_password: SecretString,
    /// Sender address
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = database_url()?;
        let host = parsed("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parsed("STOREFRONT_PORT", "3000")?;
        let base_url = Url::parse(&required("STOREFRONT_BASE_URL")?).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
        })?;

        let tokens = TokenConfig::from_env()?;
        let email = EmailConfig::from_env()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            tokens,
            email,
            run_migrations: parsed("STOREFRONT_RUN_MIGRATIONS", "false")?,
            rate_limit: parsed("STOREFRONT_RATE_LIMIT", "true")?,
            json_logs: optional("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            sentry_dsn: optional("SENTRY_DSN"),
            sentry_environment: optional("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl TokenConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let session_secret = signing_secret("STOREFRONT_SESSION_SECRET")?;
        let reset_secret = signing_secret("STOREFRONT_RESET_SECRET")?;

        if session_secret.expose_secret() == reset_secret.expose_secret() {
            return Err(ConfigError::InsecureSecret(
                "STOREFRONT_RESET_SECRET".to_string(),
                "must differ from STOREFRONT_SESSION_SECRET".to_string(),
            ));
        }

        let session_ttl_minutes: i64 = parsed("STOREFRONT_SESSION_TTL_MINUTES", "60")?;
        if session_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_SESSION_TTL_MINUTES".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            session_secret,
            reset_secret,
            session_ttl_minutes,
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_host: required("SMTP_HOST")?,
            smtp_port: parsed("SMTP_PORT", "587")?,
            smtp_username: required("SMTP_USERNAME")?,
            smtp_password: SecretString::from(required("SMTP_PASSWORD")?),
            from_address: required("EMAIL_FROM")?,
        })
    }
}

// =============================================================================
// Environment helpers
// =============================================================================

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `key` (or `default` when unset) into `T`.
fn parsed<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// `STOREFRONT_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, ConfigError> {
    optional("STOREFRONT_DATABASE_URL")
        .or_else(|| optional("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar("STOREFRONT_DATABASE_URL".to_string()))
}

fn signing_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = required(key)?;
    check_signing_secret(&value, key)?;
    Ok(SecretString::from(value))
}

/// Reject short keys, obvious placeholders and low-entropy strings.
fn check_signing_secret(value: &str, key: &str) -> Result<(), ConfigError> {
    let insecure = |reason: String| ConfigError::InsecureSecret(key.to_string(), reason);

    let length = value.chars().count();
    if length < MIN_SIGNING_SECRET_LENGTH {
        return Err(insecure(format!(
            "must be at least {MIN_SIGNING_SECRET_LENGTH} characters (got {length})"
        )));
    }

    let lower = value.to_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(insecure(format!(
            "looks like a placeholder (contains '{pattern}')"
        )));
    }

    let entropy = entropy_bits_per_char(value);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(insecure(format!(
            "entropy {entropy:.2} bits/char is below {MIN_ENTROPY_BITS_PER_CHAR:.1}; use a randomly generated key"
        )));
    }

    Ok(())
}

/// Shannon entropy in bits per character.
fn entropy_bits_per_char(s: &str) -> f64 {
    let mut counts: HashMap<char, u32> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_default() += 1;
    }

    let total: u32 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }

    let total = f64::from(total);
    counts
        .values()
        .map(|&n| {
            let p = f64::from(n) / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    const STRONG_KEY: &str = "k7#Qm2!vX9@pL4$wN8^rT1&yB6*hD3(z";

    #[test]
    fn test_entropy() {
        assert!(entropy_bits_per_char("").abs() < f64::EPSILON);
        assert!(entropy_bits_per_char("aaaaaaa").abs() < f64::EPSILON);
        assert!((entropy_bits_per_char("abab") - 1.0).abs() < 0.01);
        assert!(entropy_bits_per_char(STRONG_KEY) > MIN_ENTROPY_BITS_PER_CHAR);
    }

    #[test]
    fn test_signing_secret_accepts_random_key() {
        assert!(check_signing_secret(STRONG_KEY, "KEY").is_ok());
    }

    #[test]
    fn test_signing_secret_rejections() {
        let low_entropy = "ab".repeat(20);
        for weak in [
            "k7#Qm2!vX9@pL4",
            "your-signing-key-k7#Qm2!vX9@pL4$wN8^",
            "changeme-k7#Qm2!vX9@pL4$wN8^rT1&yB6",
            low_entropy.as_str(),
        ] {
            assert!(
                matches!(
                    check_signing_secret(weak, "KEY"),
                    Err(ConfigError::InsecureSecret(_, _))
                ),
                "{weak}"
            );
        }
    }

    #[test]
    fn test_parsed_default() {
        let port: u16 = parsed("BAZAAR_TEST_UNSET_PORT_VAR", "3000").unwrap();
        assert_eq!(port, 3000);

        let flag: bool = parsed("BAZAAR_TEST_UNSET_FLAG_VAR", "false").unwrap();
        assert!(!flag);
    }

    #[test]
    fn test_parsed_invalid_default() {
        let result: Result<u16, _> = parsed("BAZAAR_TEST_UNSET_PORT_VAR", "not-a-port");
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))));
    }

    pub(crate) fn test_config() -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: Url::parse("http://localhost:3000").unwrap(),
            tokens: TokenConfig {
                session_secret: SecretString::from("s".repeat(32)),
                reset_secret: SecretString::from("r".repeat(32)),
                session_ttl_minutes: 60,
            },
            email: EmailConfig {
                smtp_host: "smtp.test".to_string(),
                smtp_port: 587,
                smtp_username: "mailer".to_string(),
                smtp_password: SecretString::from("super_secret_smtp_password"),
                from_address: "shop@bazaar.test".to_string(),
            },
            run_migrations: false,
            rate_limit: true,
            json_logs: false,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    #[test]
    fn test_socket_addr() {
        let addr = test_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = test_config();
        config.tokens.session_secret = SecretString::from("super_secret_session_key");
        config.tokens.reset_secret = SecretString::from("super_secret_reset_key");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("smtp.test"));
        assert!(debug_output.contains("shop@bazaar.test"));

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_session_key"));
        assert!(!debug_output.contains("super_secret_reset_key"));
        assert!(!debug_output.contains("super_secret_smtp_password"));
    }
}
