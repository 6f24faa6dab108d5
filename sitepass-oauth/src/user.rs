//! User-delegated tokens: silent refresh and the interactive PKCE flow.
//!
//! Per scope set the provider moves `IDLE -> (CACHED | REFRESHING | INTERACTIVE) -> IDLE`.
//! Renewals are single-flight: concurrent callers for the same scope set
//! share one refresh attempt or one browser launch and listener, and all
//! resolve from the same result.

use crate::browser::BrowserLauncher;
use crate::callback::{CallbackListener, CallbackParams};
use crate::endpoint::{
    ClientAuth, TokenEndpoint, TokenResponse, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sitepass_core::pkce::CODE_CHALLENGE_METHOD;
use sitepass_core::{
    validate_redirect_uri, AccessToken, AuthError, AuthMode, AuthResult, AuthSettings, CacheKey,
    OAuthSession, RefreshToken, ScopeSet, TokenCache, UserCredentials,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

type Flight = Shared<BoxFuture<'static, AuthResult<AccessToken>>>;

struct Inner {
    client_id: String,
    redirect_uri: Url,
    authorize_url: Url,
    auth: ClientAuth,
    endpoint: TokenEndpoint,
    cache: Arc<TokenCache>,
    browser: Arc<dyn BrowserLauncher>,
    callback_timeout: Duration,
    flights: Mutex<HashMap<CacheKey, Flight>>,
}

/// Issues tokens on behalf of a consenting user.
#[derive(Clone)]
pub struct OAuthUserTokenProvider {
    inner: Arc<Inner>,
}

impl fmt::Debug for OAuthUserTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthUserTokenProvider")
            .field("client_id", &self.inner.client_id)
            .field("redirect_uri", &self.inner.redirect_uri.as_str())
            .field("pending_flows", &self.pending_flows())
            .finish_non_exhaustive()
    }
}

impl OAuthUserTokenProvider {
    /// Create a provider from settings.
    pub fn new(
        credentials: UserCredentials,
        settings: &AuthSettings,
        cache: Arc<TokenCache>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> AuthResult<Self> {
        let endpoint = TokenEndpoint::new(settings.token_url.clone(), settings.http_timeout)?;
        Self::with_endpoint(
            credentials,
            settings.authorize_url.clone(),
            endpoint,
            cache,
            browser,
            settings.callback_timeout,
        )
    }

    /// Create a provider around an existing endpoint client.
    pub fn with_endpoint(
        credentials: UserCredentials,
        authorize_url: Url,
        endpoint: TokenEndpoint,
        cache: Arc<TokenCache>,
        browser: Arc<dyn BrowserLauncher>,
        callback_timeout: Duration,
    ) -> AuthResult<Self> {
        if credentials.client_id.trim().is_empty() {
            return Err(AuthError::configuration("OAuth client id is empty"));
        }
        validate_redirect_uri(&credentials.redirect_uri)?;

        Ok(Self {
            inner: Arc::new(Inner {
                auth: ClientAuth::new(credentials.client_id.clone(), credentials.client_secret),
                client_id: credentials.client_id,
                redirect_uri: credentials.redirect_uri,
                authorize_url,
                endpoint,
                cache,
                browser,
                callback_timeout,
                flights: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Get a user token for `scopes`.
    pub async fn get_token<I, S>(&self, scopes: I) -> AuthResult<AccessToken>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = ScopeSet::new(scopes)?;
        self.get_token_for(&scopes).await
    }

    /// Get a user token for an already normalised scope set.
    #[tracing::instrument(skip_all, fields(mode = "user", scopes = %scopes))]
    pub async fn get_token_for(&self, scopes: &ScopeSet) -> AuthResult<AccessToken> {
        let key = CacheKey::new(AuthMode::User, scopes.clone());
        if let Some(token) = self.inner.cache.get(&key) {
            debug!("user token cache hit");
            return Ok(token);
        }
        self.join_or_start(key).await
    }

    /// Number of renewals currently in flight.
    pub fn pending_flows(&self) -> usize {
        self.inner.flights.lock().len()
    }

    /// The cache this provider writes to.
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.inner.cache
    }

    fn join_or_start(&self, key: CacheKey) -> Flight {
        let mut flights = self.inner.flights.lock();
        if let Some(flight) = flights.get(&key) {
            debug!("joining in-flight renewal");
            return flight.clone();
        }

        // The renewal runs as its own task so it finishes (and clears its
        // flight entry) even if every caller stops waiting.
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            // Built on first poll so it never locks `flights` under this lock.
            let guard = FlightGuard {
                inner,
                key: task_key,
            };
            let result = guard.inner.renew(&guard.key).await;
            drop(guard);
            result
        });
        let flight = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(AuthError::Internal(format!("token renewal task failed: {e}"))))
        }
        .boxed()
        .shared();
        flights.insert(key, flight.clone());
        flight
    }
}

/// Clears a renewal's flight entry when its task ends, panics and
/// cancellation included.
struct FlightGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // No newer flight for this key can exist while this one is registered.
        self.inner.flights.lock().remove(&self.key);
    }
}

impl Inner {
    async fn renew(&self, key: &CacheKey) -> AuthResult<AccessToken> {
        if let Some(token) = self.cache.get(key) {
            return Ok(token);
        }

        if let Some(refresh) = self.cache.refresh_token(key) {
            match self.refresh(key, &refresh).await {
                Ok(token) => return Ok(token),
                Err(err @ AuthError::Network(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        kind = %err.kind(),
                        error_description = ?err.provider_description(),
                        "refresh rejected; discarding refresh token"
                    );
                    self.cache.discard_refresh_token(key);
                }
            }
        }

        self.interactive(key).await
    }

    async fn refresh(&self, key: &CacheKey, refresh: &RefreshToken) -> AuthResult<AccessToken> {
        debug!("refreshing user token");
        let response = self
            .endpoint
            .exchange(
                GRANT_REFRESH_TOKEN,
                vec![
                    ("refresh_token", refresh.secret().to_string()),
                    ("scope", key.scopes.joined()),
                ],
                &self.auth,
            )
            .await?;
        info!(expires_in = response.expires_in, "refreshed user token");
        Ok(self.store(key, response))
    }

    async fn interactive(&self, key: &CacheKey) -> AuthResult<AccessToken> {
        let session = OAuthSession::new(self.callback_timeout);
        let listener = CallbackListener::bind(&self.redirect_uri).await?;
        let url = self.authorization_url(&key.scopes, &session);

        info!(listener = %listener.local_addr(), "starting interactive authorization");
        if let Err(err) = self.browser.open(&url) {
            warn!(error = %err, url = %url, "could not launch a browser; open the URL manually");
        }

        let params = listener
            .wait(session.time_left())
            .await
            .map_err(|err| {
                warn!(kind = %err.kind(), "interactive authorization ended without a callback");
                match err {
                    AuthError::Timeout(_) => AuthError::Timeout(session.timeout),
                    other => other,
                }
            })?;
        self.complete(key, &session, params).await
    }

    async fn complete(
        &self,
        key: &CacheKey,
        session: &OAuthSession,
        params: CallbackParams,
    ) -> AuthResult<AccessToken> {
        let state_matches: bool = params
            .state
            .as_bytes()
            .ct_eq(session.state.as_bytes())
            .into();
        if !state_matches {
            warn!(kind = "security", "callback state did not match the pending session");
            return Err(AuthError::security(
                "callback state did not match the pending session",
            ));
        }

        if let Some(error) = params.error {
            warn!(
                kind = "user_denied",
                error = %error,
                error_description = ?params.error_description,
                "authorization denied"
            );
            return Err(AuthError::UserDenied {
                error,
                description: params.error_description,
            });
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::protocol("callback carried neither a code nor an error"))?;

        let response = self
            .endpoint
            .exchange(
                GRANT_AUTHORIZATION_CODE,
                vec![
                    ("code", code),
                    ("redirect_uri", self.redirect_uri.to_string()),
                    ("code_verifier", session.pkce.code_verifier().to_string()),
                ],
                &self.auth,
            )
            .await?;
        info!(
            expires_in = response.expires_in,
            refresh = response.refresh_token.is_some(),
            "authorization code exchanged"
        );
        Ok(self.store(key, response))
    }

    fn store(&self, key: &CacheKey, response: TokenResponse) -> AccessToken {
        let refresh = response
            .refresh_token
            .map(|value| RefreshToken::new(value, AuthMode::User, key.scopes.clone()));
        let token = AccessToken::expiring_in(
            response.access_token,
            response.token_type,
            Duration::from_secs(response.expires_in),
            key.scopes.clone(),
            AuthMode::User,
        );
        self.cache.put(key.clone(), token.clone(), refresh);
        token
    }

    fn authorization_url(&self, scopes: &ScopeSet, session: &OAuthSession) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &scopes.joined())
            .append_pair("state", &session.state)
            .append_pair("code_challenge", &session.pkce.code_challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        url
    }
}
