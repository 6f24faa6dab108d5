//! Service-account tokens via a signed JWT assertion.

use crate::endpoint::{ClientAuth, TokenEndpoint, GRANT_JWT_BEARER};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sitepass_core::{
    AccessToken, AuthError, AuthMode, AuthResult, AuthSettings, CacheKey, ScopeSet,
    ServiceAccountCredentials, TokenCache,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Claims of the service assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Client id.
    pub iss: String,
    /// Service account id.
    pub sub: String,
    /// Token endpoint URL.
    pub aud: String,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Space-delimited scopes.
    pub scope: String,
}

/// Issues access tokens for a service account. No user is involved.
///
/// Calls for different scope sets are independent. Concurrent calls for the
/// same scope set may each perform an exchange when they all observe a miss;
/// the grant has no side effects beyond issuing a token.
pub struct ServiceAccountTokenProvider {
    client_id: String,
    service_account_id: String,
    key_id: String,
    signing_key: EncodingKey,
    auth: ClientAuth,
    endpoint: TokenEndpoint,
    cache: Arc<TokenCache>,
    assertion_lifetime: Duration,
}

impl fmt::Debug for ServiceAccountTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountTokenProvider")
            .field("client_id", &self.client_id)
            .field("service_account_id", &self.service_account_id)
            .field("key_id", &self.key_id)
            .field("endpoint", &self.endpoint.url().as_str())
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenProvider {
    /// Create a provider from settings.
    ///
    /// The private key is parsed and test-signed here, so malformed key
    /// material fails at construction rather than on the first call.
    pub fn new(
        credentials: ServiceAccountCredentials,
        settings: &AuthSettings,
        cache: Arc<TokenCache>,
    ) -> AuthResult<Self> {
        let endpoint = TokenEndpoint::new(settings.token_url.clone(), settings.http_timeout)?;
        Self::with_endpoint(credentials, endpoint, cache, settings.assertion_lifetime)
    }

    /// Create a provider around an existing endpoint client.
    pub fn with_endpoint(
        credentials: ServiceAccountCredentials,
        endpoint: TokenEndpoint,
        cache: Arc<TokenCache>,
        assertion_lifetime: Duration,
    ) -> AuthResult<Self> {
        for (name, value) in [
            ("client id", &credentials.client_id),
            ("service account id", &credentials.service_account_id),
            ("signing key id", &credentials.key_id),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::configuration(format!("{name} is empty")));
            }
        }

        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key_pem.expose_secret().as_bytes())
            .map_err(|e| AuthError::configuration(format!("invalid RSA private key: {e}")))?;

        let provider = Self {
            auth: ClientAuth::new(credentials.client_id.clone(), credentials.client_secret.clone()),
            client_id: credentials.client_id,
            service_account_id: credentials.service_account_id,
            key_id: credentials.key_id,
            signing_key,
            endpoint,
            cache,
            assertion_lifetime,
        };

        // PEM framing can be valid around an unusable key; only signing tells.
        provider.sign(&AssertionClaims {
            iss: provider.client_id.clone(),
            sub: provider.service_account_id.clone(),
            aud: provider.endpoint.url().to_string(),
            exp: 0,
            scope: String::new(),
        })?;

        Ok(provider)
    }

    /// Get a token for `scopes`, exchanging a fresh assertion on a miss.
    pub async fn get_token<I, S>(&self, scopes: I) -> AuthResult<AccessToken>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = ScopeSet::new(scopes)?;
        self.get_token_for(&scopes).await
    }

    /// Get a token for an already normalised scope set.
    #[tracing::instrument(skip_all, fields(mode = "service", scopes = %scopes))]
    pub async fn get_token_for(&self, scopes: &ScopeSet) -> AuthResult<AccessToken> {
        let key = CacheKey::new(AuthMode::Service, scopes.clone());
        if let Some(token) = self.cache.get(&key) {
            debug!("service token cache hit");
            return Ok(token);
        }

        let assertion = self.build_assertion(scopes)?;
        let response = self
            .endpoint
            .exchange(
                GRANT_JWT_BEARER,
                vec![("assertion", assertion)],
                &self.auth,
            )
            .await?;

        let token = AccessToken::expiring_in(
            response.access_token,
            response.token_type,
            Duration::from_secs(response.expires_in),
            scopes.clone(),
            AuthMode::Service,
        );
        info!(expires_in = response.expires_in, "issued service token");
        self.cache.put(key, token.clone(), None);
        Ok(token)
    }

    /// Build and sign the assertion for `scopes`.
    pub fn build_assertion(&self, scopes: &ScopeSet) -> AuthResult<String> {
        let lifetime = i64::try_from(self.assertion_lifetime.as_secs()).unwrap_or(i64::MAX);
        let claims = AssertionClaims {
            iss: self.client_id.clone(),
            sub: self.service_account_id.clone(),
            aud: self.endpoint.url().to_string(),
            exp: chrono::Utc::now().timestamp().saturating_add(lifetime),
            scope: scopes.joined(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &AssertionClaims) -> AuthResult<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.signing_key)
            .map_err(|e| AuthError::configuration(format!("failed to sign assertion: {e}")))
    }

    /// The cache this provider writes to.
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }
}
