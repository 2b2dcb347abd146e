//! Integration tests for Bazaar.
//!
//! The storefront router runs in-process against the in-memory stores and a
//! recording notifier, so no database or SMTP relay is needed. The
//! `postgres` suite is the exception and is ignored by default.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p bazaar-integration-tests
//! DATABASE_URL=postgres://... cargo test -p bazaar-integration-tests --test postgres -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `auth_flow` - Registration, two-step login, password reset
//! - `checkout` - Carts, checkout and cancellation through the services
//! - `http` - The same flows over the HTTP router
//! - `postgres` - The `PostgreSQL` stores: cart creation races, single-use
//!   login codes, order cancellation

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use bazaar_core::{Email, Money, ProductId, UserId};
use bazaar_storefront::config::{EmailConfig, StorefrontConfig, TokenConfig};
use bazaar_storefront::db::memory::MemoryStore;
use bazaar_storefront::routes;
use bazaar_storefront::services::auth::Registration;
use bazaar_storefront::services::notifier::RecordingNotifier;
use bazaar_storefront::state::AppState;

/// Password used by [`TestContext::signed_in`].
pub const PASSWORD: &str = "correct horse battery";

/// Products seeded into every context: `(id, cents)`.
pub const CATALOG: [(i32, u32); 3] = [(1, 1_250), (2, 499), (3, 10_000)];

/// Configuration with throwaway secrets and rate limiting off.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        base_url: Url::parse("https://shop.bazaar.test").unwrap_or_else(|e| panic!("base url: {e}")),
        tokens: TokenConfig {
            session_secret: SecretString::from("k7#Qm2!vX9@pL4$wN8^rT1&yB6*hD3(z"),
            reset_secret: SecretString::from("J5)cF0_gS2+eA8=uM4-oW7~iK1?nV3<q"),
            session_ttl_minutes: 60,
        },
        email: EmailConfig {
            smtp_host: "smtp.bazaar.test".to_owned(),
            smtp_port: 587,
            smtp_username: "bazaar".to_owned(),
            smtp_password: SecretString::from("unused"),
            from_address: "Bazaar <no-reply@bazaar.test>".to_owned(),
        },
        run_migrations: false,
        rate_limit: false,
        json_logs: false,
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// An in-process storefront plus handles on its fakes.
pub struct TestContext {
    pub store: MemoryStore,
    pub notifier: RecordingNotifier,
    pub state: AppState,
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: StorefrontConfig) -> Self {
        let store = MemoryStore::new();
        for (id, cents) in CATALOG {
            store.set_product_price(ProductId::new(id), Money::from_cents(cents));
        }

        let notifier = RecordingNotifier::new();
        let state = AppState::new(
            config,
            store.stores(),
            Arc::new(notifier.clone()),
            None,
        );

        Self {
            store,
            notifier,
            state,
        }
    }

    /// The full HTTP router over this context's state.
    #[must_use]
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Register `email` with [`PASSWORD`] and complete both login steps.
    ///
    /// # Panics
    ///
    /// Panics if any step fails.
    pub async fn signed_in(&self, email: &str) -> (UserId, String) {
        let auth = self.state.auth();
        let registration = Registration {
            first_name: "Grace".to_owned(),
            last_name: "Hopper".to_owned(),
            email: email.to_owned(),
            password: PASSWORD.to_owned(),
        };
        let user = auth.register(&registration).await.unwrap_or_else(|e| panic!("register: {e}"));
        let ack = auth
            .login(email, PASSWORD)
            .await
            .unwrap_or_else(|e| panic!("login: {e}"));
        let code = self
            .last_code(email)
            .unwrap_or_else(|| panic!("no login code mailed to {email}"));
        let session = auth
            .verify_challenge(ack.user_id, &code)
            .await
            .unwrap_or_else(|e| panic!("verify: {e}"));

        (user.id, session.token)
    }

    /// Login code most recently mailed to `email`.
    #[must_use]
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.notifier.last_code_for(&Email::parse(email).ok()?)
    }

    /// Reset token most recently mailed to `email`.
    #[must_use]
    pub fn last_reset_token(&self, email: &str) -> Option<String> {
        self.notifier.last_reset_token_for(&Email::parse(email).ok()?)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a JSON request, optionally with a bearer token.
///
/// # Panics
///
/// Panics if the request cannot be built.
#[must_use]
pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    builder.body(body).unwrap_or_else(|e| panic!("request: {e}"))
}

/// Send one request through `router`, returning status and JSON body.
///
/// An empty or non-JSON body comes back as `Value::Null`.
///
/// # Panics
///
/// Panics if the router fails or the body cannot be read.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .oneshot(request)
        .await
        .unwrap_or_else(|e| match e {});
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|e| panic!("body: {e}"));

    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}
