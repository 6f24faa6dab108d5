//! One entry point for both token modes.

use sitepass_core::{
    AccessToken, AuthError, AuthMode, AuthResult, AuthSettings, CacheKey, CredentialSupplier,
    EnvCredentials, ScopeSet, TokenCache,
};
use sitepass_oauth::{
    BrowserLauncher, OAuthUserTokenProvider, ServiceAccountTokenProvider, SystemBrowser,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out access tokens for either trust model over one shared cache.
///
/// Providers attached with [`with_service_provider`](Self::with_service_provider)
/// and [`with_user_provider`](Self::with_user_provider) should be built around
/// [`cache`](Self::cache), so that [`invalidate`](Self::invalidate) and
/// [`clear`](Self::clear) reach the tokens they issue.
#[derive(Debug)]
pub struct TokenBroker {
    cache: Arc<TokenCache>,
    service: Option<ServiceAccountTokenProvider>,
    user: Option<OAuthUserTokenProvider>,
}

impl TokenBroker {
    /// An empty broker; attach providers with the `with_*` methods.
    pub fn new(cache: Arc<TokenCache>) -> Self {
        Self {
            cache,
            service: None,
            user: None,
        }
    }

    /// Wire providers for every mode `supplier` has credentials for.
    pub fn from_supplier(
        settings: &AuthSettings,
        supplier: &dyn CredentialSupplier,
        browser: Arc<dyn BrowserLauncher>,
    ) -> AuthResult<Self> {
        let cache = Arc::new(TokenCache::new(settings.safety_buffer));
        let mut broker = Self::new(Arc::clone(&cache));

        if let Some(creds) = supplier.service_account()? {
            broker.service = Some(ServiceAccountTokenProvider::new(
                creds,
                settings,
                Arc::clone(&cache),
            )?);
        }
        if let Some(creds) = supplier.user()? {
            broker.user = Some(OAuthUserTokenProvider::new(
                creds,
                settings,
                Arc::clone(&cache),
                browser,
            )?);
        }

        info!(
            service = broker.supports(AuthMode::Service),
            user = broker.supports(AuthMode::User),
            "token broker configured"
        );
        Ok(broker)
    }

    /// Settings and credentials from `SITEPASS_*` variables, opening the system browser.
    pub fn from_env() -> AuthResult<Self> {
        let settings = AuthSettings::from_env()?;
        Self::from_supplier(&settings, &EnvCredentials::new(), Arc::new(SystemBrowser))
    }

    /// Attach a service-account provider.
    #[must_use]
    pub fn with_service_provider(mut self, provider: ServiceAccountTokenProvider) -> Self {
        self.service = Some(provider);
        self
    }

    /// Attach a user provider.
    #[must_use]
    pub fn with_user_provider(mut self, provider: OAuthUserTokenProvider) -> Self {
        self.user = Some(provider);
        self
    }

    /// Whether a provider is configured for `mode`.
    pub fn supports(&self, mode: AuthMode) -> bool {
        match mode {
            AuthMode::Service => self.service.is_some(),
            AuthMode::User => self.user.is_some(),
        }
    }

    /// Get a token for `scopes` under `mode`.
    pub async fn get_token<I, S>(&self, mode: AuthMode, scopes: I) -> AuthResult<AccessToken>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = ScopeSet::new(scopes)?;
        debug!(%mode, %scopes, "token requested");
        match mode {
            AuthMode::Service => self.service_provider()?.get_token_for(&scopes).await,
            AuthMode::User => self.user_provider()?.get_token_for(&scopes).await,
        }
    }

    /// Drop the cached token (and refresh token) for `mode` and `scopes`.
    pub fn invalidate<I, S>(&self, mode: AuthMode, scopes: I) -> AuthResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = CacheKey::new(mode, ScopeSet::new(scopes)?);
        Ok(self.cache.invalidate(&key))
    }

    /// Drop every cached token.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    fn service_provider(&self) -> AuthResult<&ServiceAccountTokenProvider> {
        self.service
            .as_ref()
            .ok_or_else(|| AuthError::configuration("no service-account credentials configured"))
    }

    fn user_provider(&self) -> AuthResult<&OAuthUserTokenProvider> {
        self.user
            .as_ref()
            .ok_or_else(|| AuthError::configuration("no user OAuth client configured"))
    }
}
