//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::Stores;
use crate::services::auth::{AuthService, ChallengeIssuer, CodeGenerator};
use crate::services::commerce::{CartService, CheckoutService};
use crate::services::notifier::Notifier;
use crate::services::tokens::TokenService;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`. Everything inside is read-only
/// after startup; services are built per request and borrow from it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    stores: Stores,
    tokens: TokenService,
    codes: CodeGenerator,
    notifier: Arc<dyn Notifier>,
    pool: Option<PgPool>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `stores` - Store implementations the services run against
    /// * `notifier` - Outbound mail
    /// * `pool` - `PostgreSQL` pool for readiness checks, if the stores use one
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        pool: Option<PgPool>,
    ) -> Self {
        let tokens = TokenService::new(&config.tokens);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                stores,
                tokens,
                codes: CodeGenerator::new(),
                notifier,
                pool,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the stores.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    /// Get a reference to the token service.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    /// Get a reference to the database pool, when running on `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    /// Authentication service for one request.
    #[must_use]
    pub fn auth(&self) -> AuthService<'_> {
        let inner = &*self.inner;
        AuthService::new(
            inner.stores.users.as_ref(),
            ChallengeIssuer::new(inner.stores.challenges.as_ref(), &inner.codes),
            &inner.tokens,
            inner.notifier.as_ref(),
            &inner.config.base_url,
        )
    }

    /// Cart service for one request.
    #[must_use]
    pub fn carts(&self) -> CartService<'_> {
        CartService::new(self.inner.stores.carts.as_ref())
    }

    /// Checkout service for one request.
    #[must_use]
    pub fn checkout(&self) -> CheckoutService<'_> {
        let stores = &self.inner.stores;
        CheckoutService::new(
            stores.carts.as_ref(),
            stores.payments.as_ref(),
            stores.orders.as_ref(),
        )
    }
}
