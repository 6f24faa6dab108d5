//! OAuth token endpoint client.
//!
//! Every grant is a form-encoded POST. Responses are parsed into an explicit
//! schema; anything that does not fit is a protocol error rather than a
//! half-filled token.

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sitepass_core::{AuthError, AuthResult};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Grant type for a signed JWT assertion.
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Grant type for an authorization code.
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
/// Grant type for a refresh token.
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Issued access token.
    pub access_token: String,
    /// Token type; only bearer tokens are accepted.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    /// Refresh token, user grants only.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Parse and validate a response body.
    pub fn parse(body: &str) -> AuthResult<Self> {
        let response: Self = serde_json::from_str(body)
            .map_err(|e| AuthError::protocol(format!("invalid token response: {e}")))?;
        response.validate()?;
        Ok(response)
    }

    fn validate(&self) -> AuthResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(AuthError::protocol("token response has an empty access_token"));
        }
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::protocol(format!(
                "unsupported token_type '{}'",
                self.token_type
            )));
        }
        if self.expires_in == 0 {
            return Err(AuthError::protocol("token response has expires_in of 0"));
        }
        if matches!(&self.refresh_token, Some(rt) if rt.trim().is_empty()) {
            return Err(AuthError::protocol("token response has an empty refresh_token"));
        }
        Ok(())
    }

    /// Lifetime as a duration.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// How the client authenticates to the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    client_id: String,
    client_secret: Option<SecretString>,
}

impl ClientAuth {
    /// Create client authentication. With a secret, HTTP Basic is used;
    /// without one, `client_id` goes in the form body.
    pub fn new(client_id: impl Into<String>, client_secret: Option<SecretString>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// The client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether this is a confidential client.
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }
}

/// Client for one token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: Client,
    url: Url,
}

impl TokenEndpoint {
    /// Create an endpoint client with a request timeout.
    pub fn new(url: Url, timeout: Duration) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    /// Create an endpoint client around an existing HTTP client.
    pub fn with_client(url: Url, client: Client) -> Self {
        Self { client, url }
    }

    /// The endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// POST a grant and parse the response.
    ///
    /// Non-2xx responses become [`AuthError::Authentication`] carrying the
    /// provider's error code and description. No retries.
    pub async fn exchange(
        &self,
        grant_type: &'static str,
        params: Vec<(&'static str, String)>,
        auth: &ClientAuth,
    ) -> AuthResult<TokenResponse> {
        let mut form: Vec<(&str, String)> = Vec::with_capacity(params.len() + 2);
        form.push(("grant_type", grant_type.to_string()));
        form.extend(params);

        let mut request = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        match &auth.client_secret {
            Some(secret) => {
                request = request.basic_auth(&auth.client_id, Some(secret.expose_secret()));
            }
            None => form.push(("client_id", auth.client_id.clone())),
        }

        debug!(grant_type, url = %self.url, "requesting token");
        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&self.url, e))?;

        if !status.is_success() {
            let err = rejection(status, &body);
            warn!(
                grant_type,
                status = status.as_u16(),
                kind = %err.kind(),
                error_description = ?err.provider_description(),
                "token endpoint rejected request"
            );
            return Err(err);
        }

        TokenResponse::parse(&body)
    }
}

fn transport_error(url: &Url, err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::network(format!("request to {url} timed out"))
    } else if err.is_decode() {
        AuthError::protocol(format!("failed to read response from {url}: {err}"))
    } else {
        AuthError::network(format!("failed to reach {url}: {err}"))
    }
}

fn rejection(status: StatusCode, body: &str) -> AuthError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => AuthError::authentication(status.as_u16(), parsed.error, parsed.error_description),
        Err(_) => {
            let snippet: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            let description = (!snippet.is_empty()).then_some(snippet);
            AuthError::authentication(
                status.as_u16(),
                status.canonical_reason().unwrap_or("http_error").to_string(),
                description,
            )
        }
    }
}
