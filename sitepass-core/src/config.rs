//! Settings and credential supply.

use crate::cache::DEFAULT_SAFETY_BUFFER;
use crate::error::{AuthError, AuthResult};
use secrecy::SecretString;
use std::net::IpAddr;
use std::time::Duration;
use url::Url;

/// Environment variable names read by [`AuthSettings::from_env`] and [`EnvCredentials`].
pub mod env {
    /// Token endpoint URL.
    pub const TOKEN_URL: &str = "SITEPASS_TOKEN_URL";
    /// Authorization endpoint URL.
    pub const AUTHORIZE_URL: &str = "SITEPASS_AUTHORIZE_URL";
    /// Safety buffer in seconds.
    pub const SAFETY_BUFFER_SECS: &str = "SITEPASS_SAFETY_BUFFER_SECS";
    /// Interactive callback deadline in seconds.
    pub const CALLBACK_TIMEOUT_SECS: &str = "SITEPASS_CALLBACK_TIMEOUT_SECS";
    /// HTTP request timeout in seconds.
    pub const HTTP_TIMEOUT_SECS: &str = "SITEPASS_HTTP_TIMEOUT_SECS";
    /// Service-mode client id.
    pub const SERVICE_CLIENT_ID: &str = "SITEPASS_SERVICE_CLIENT_ID";
    /// Service-mode client secret.
    pub const SERVICE_CLIENT_SECRET: &str = "SITEPASS_SERVICE_CLIENT_SECRET";
    /// Service account id (JWT `sub`).
    pub const SERVICE_ACCOUNT_ID: &str = "SITEPASS_SERVICE_ACCOUNT_ID";
    /// Signing key id (JWT `kid`).
    pub const SERVICE_KEY_ID: &str = "SITEPASS_SERVICE_KEY_ID";
    /// PEM private key contents.
    pub const SERVICE_PRIVATE_KEY: &str = "SITEPASS_SERVICE_PRIVATE_KEY";
    /// Path to a PEM private key file.
    pub const SERVICE_PRIVATE_KEY_PATH: &str = "SITEPASS_SERVICE_PRIVATE_KEY_PATH";
    /// User-mode (OAuth app) client id.
    pub const USER_CLIENT_ID: &str = "SITEPASS_USER_CLIENT_ID";
    /// User-mode (OAuth app) client secret.
    pub const USER_CLIENT_SECRET: &str = "SITEPASS_USER_CLIENT_SECRET";
    /// Registered redirect URI.
    pub const REDIRECT_URI: &str = "SITEPASS_REDIRECT_URI";
}

/// Endpoints and timing for token acquisition.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// OAuth token endpoint.
    pub token_url: Url,
    /// OAuth authorization endpoint (user mode).
    pub authorize_url: Url,
    /// Minimum remaining validity for a cached token.
    pub safety_buffer: Duration,
    /// Lifetime of a signed service assertion.
    pub assertion_lifetime: Duration,
    /// Deadline for an interactive authorization.
    pub callback_timeout: Duration,
    /// Timeout for each token endpoint request.
    pub http_timeout: Duration,
}

impl AuthSettings {
    /// Create settings with default timing.
    pub fn new(token_url: Url, authorize_url: Url) -> Self {
        Self {
            token_url,
            authorize_url,
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            assertion_lifetime: Duration::from_secs(300),
            callback_timeout: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Read settings from `SITEPASS_*` environment variables.
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_url = parse_url(env::TOKEN_URL, &required(&lookup, env::TOKEN_URL)?)?;
        let authorize_url = parse_url(env::AUTHORIZE_URL, &required(&lookup, env::AUTHORIZE_URL)?)?;
        let mut settings = Self::new(token_url, authorize_url);
        if let Some(secs) = seconds(&lookup, env::SAFETY_BUFFER_SECS)? {
            settings.safety_buffer = secs;
        }
        if let Some(secs) = seconds(&lookup, env::CALLBACK_TIMEOUT_SECS)? {
            settings.callback_timeout = secs;
        }
        if let Some(secs) = seconds(&lookup, env::HTTP_TIMEOUT_SECS)? {
            settings.http_timeout = secs;
        }
        Ok(settings)
    }

    /// Set the safety buffer.
    #[must_use]
    pub fn with_safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }

    /// Set the service assertion lifetime.
    #[must_use]
    pub fn with_assertion_lifetime(mut self, lifetime: Duration) -> Self {
        self.assertion_lifetime = lifetime;
        self
    }

    /// Set the interactive callback deadline.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

/// Static secrets for the service-account (machine-to-machine) mode.
#[derive(Debug, Clone)]
pub struct ServiceAccountCredentials {
    /// Client id; the assertion issuer.
    pub client_id: String,
    /// Client secret, sent with HTTP Basic when present.
    pub client_secret: Option<SecretString>,
    /// Service account id; the assertion subject.
    pub service_account_id: String,
    /// Signing key id placed in the JWT header.
    pub key_id: String,
    /// PEM encoded RSA private key.
    pub private_key_pem: SecretString,
}

impl ServiceAccountCredentials {
    /// Create service-account credentials.
    pub fn new(
        client_id: impl Into<String>,
        service_account_id: impl Into<String>,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            service_account_id: service_account_id.into(),
            key_id: key_id.into(),
            private_key_pem: SecretString::new(private_key_pem.into()),
        }
    }

    /// Set the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }
}

/// Static secrets for the user-delegated mode.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    /// OAuth app client id.
    pub client_id: String,
    /// OAuth app secret; `None` for a public PKCE client.
    pub client_secret: Option<SecretString>,
    /// Redirect URI registered for the app; must be loopback with a port.
    pub redirect_uri: Url,
}

impl UserCredentials {
    /// Create user credentials, validating the redirect URI.
    pub fn new(client_id: impl Into<String>, redirect_uri: Url) -> AuthResult<Self> {
        validate_redirect_uri(&redirect_uri)?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri,
        })
    }

    /// Set the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }
}

/// Check that a redirect URI can be served by a local callback listener.
pub fn validate_redirect_uri(uri: &Url) -> AuthResult<()> {
    if uri.scheme() != "http" {
        return Err(AuthError::configuration(format!(
            "redirect URI must use http on loopback, got scheme '{}'",
            uri.scheme()
        )));
    }
    let loopback = match uri.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    };
    if !loopback {
        return Err(AuthError::configuration(
            "redirect URI host must be localhost, 127.0.0.1 or [::1]",
        ));
    }
    if uri.port().is_none() {
        return Err(AuthError::configuration("redirect URI must name an explicit port"));
    }
    Ok(())
}

/// Supplies the static secrets for each mode.
///
/// `Ok(None)` means the mode is not configured at all; partially configured
/// modes are a configuration error.
pub trait CredentialSupplier: Send + Sync {
    /// Service-account credentials.
    fn service_account(&self) -> AuthResult<Option<ServiceAccountCredentials>>;

    /// User-mode OAuth app credentials.
    fn user(&self) -> AuthResult<Option<UserCredentials>>;
}

/// Credentials held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    service_account: Option<ServiceAccountCredentials>,
    user: Option<UserCredentials>,
}

impl StaticCredentials {
    /// Create an empty supplier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide service-account credentials.
    #[must_use]
    pub fn with_service_account(mut self, creds: ServiceAccountCredentials) -> Self {
        self.service_account = Some(creds);
        self
    }

    /// Provide user credentials.
    #[must_use]
    pub fn with_user(mut self, creds: UserCredentials) -> Self {
        self.user = Some(creds);
        self
    }
}

impl CredentialSupplier for StaticCredentials {
    fn service_account(&self) -> AuthResult<Option<ServiceAccountCredentials>> {
        Ok(self.service_account.clone())
    }

    fn user(&self) -> AuthResult<Option<UserCredentials>> {
        Ok(self.user.clone())
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials read from `SITEPASS_*` environment variables.
pub struct EnvCredentials {
    lookup: Lookup,
}

impl std::fmt::Debug for EnvCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCredentials").finish_non_exhaustive()
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvCredentials {
    /// Read from the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Read through a custom lookup.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn private_key(&self) -> AuthResult<Option<String>> {
        if let Some(pem) = (self.lookup)(env::SERVICE_PRIVATE_KEY).filter(|v| !v.trim().is_empty()) {
            // Single-line env values usually carry escaped newlines.
            return Ok(Some(pem.replace("\\n", "\n")));
        }
        match self.get(env::SERVICE_PRIVATE_KEY_PATH) {
            Some(path) => std::fs::read_to_string(&path).map(Some).map_err(|e| {
                AuthError::configuration(format!("failed to read private key file {path}: {e}"))
            }),
            None => Ok(None),
        }
    }
}

impl CredentialSupplier for EnvCredentials {
    fn service_account(&self) -> AuthResult<Option<ServiceAccountCredentials>> {
        let client_id = self.get(env::SERVICE_CLIENT_ID);
        let account_id = self.get(env::SERVICE_ACCOUNT_ID);
        let key_id = self.get(env::SERVICE_KEY_ID);
        let private_key = self.private_key()?;
        if client_id.is_none() && account_id.is_none() && key_id.is_none() && private_key.is_none() {
            return Ok(None);
        }
        let missing = |name: &str| AuthError::configuration(format!("{name} is not set"));
        let mut creds = ServiceAccountCredentials::new(
            client_id.ok_or_else(|| missing(env::SERVICE_CLIENT_ID))?,
            account_id.ok_or_else(|| missing(env::SERVICE_ACCOUNT_ID))?,
            key_id.ok_or_else(|| missing(env::SERVICE_KEY_ID))?,
            private_key.ok_or_else(|| missing(env::SERVICE_PRIVATE_KEY))?,
        );
        if let Some(secret) = self.get(env::SERVICE_CLIENT_SECRET) {
            creds = creds.with_client_secret(secret);
        }
        Ok(Some(creds))
    }

    fn user(&self) -> AuthResult<Option<UserCredentials>> {
        let client_id = self.get(env::USER_CLIENT_ID);
        let redirect = self.get(env::REDIRECT_URI);
        let (client_id, redirect) = match (client_id, redirect) {
            (None, None) => return Ok(None),
            (Some(id), Some(uri)) => (id, uri),
            (None, Some(_)) => {
                return Err(AuthError::configuration(format!("{} is not set", env::USER_CLIENT_ID)))
            }
            (Some(_), None) => {
                return Err(AuthError::configuration(format!("{} is not set", env::REDIRECT_URI)))
            }
        };
        let mut creds = UserCredentials::new(client_id, parse_url(env::REDIRECT_URI, &redirect)?)?;
        if let Some(secret) = self.get(env::USER_CLIENT_SECRET) {
            creds = creds.with_client_secret(secret);
        }
        Ok(Some(creds))
    }
}

fn required<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> AuthResult<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::configuration(format!("{name} is not set")))
}

fn seconds<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str) -> AuthResult<Option<Duration>> {
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| AuthError::configuration(format!("{name} must be a whole number of seconds, got '{raw}'"))),
        None => Ok(None),
    }
}

fn parse_url(name: &str, raw: &str) -> AuthResult<Url> {
    Url::parse(raw).map_err(|e| AuthError::configuration(format!("{name} is not a valid URL: {e}")))
}
