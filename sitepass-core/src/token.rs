//! Access and refresh tokens.
//!
//! Token values are held in [`SecretString`] so `Debug` output never leaks
//! them into logs.

use crate::scope::{AuthMode, ScopeSet};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// A short-lived bearer credential.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: SecretString,
    /// Token type reported by the server (normally `Bearer`).
    pub token_type: String,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Scopes the token was requested for.
    pub scopes: ScopeSet,
    /// Trust model the token was issued under.
    pub mode: AuthMode,
}

impl AccessToken {
    /// Create a token with an absolute expiry.
    pub fn new(
        value: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
        scopes: ScopeSet,
        mode: AuthMode,
    ) -> Self {
        Self {
            value: SecretString::new(value.into()),
            token_type: token_type.into(),
            expires_at,
            scopes,
            mode,
        }
    }

    /// Create a token that expires `expires_in` from now.
    pub fn expiring_in(
        value: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: Duration,
        scopes: ScopeSet,
        mode: AuthMode,
    ) -> Self {
        let lifetime = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(value, token_type, expires_at, scopes, mode)
    }

    /// The raw token value. Callers attach this to their own requests.
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// `Authorization` header value for this token.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.value.expose_secret())
    }

    /// Validity left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether at least `buffer` of validity is left.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        self.remaining() >= buffer
    }
}

/// A user-mode refresh token, bound to the scope set it was issued for.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    value: SecretString,
    /// Trust model (always [`AuthMode::User`] in practice).
    pub mode: AuthMode,
    /// Scope set the grant was issued for.
    pub scopes: ScopeSet,
}

impl RefreshToken {
    /// Create a refresh token.
    pub fn new(value: impl Into<String>, mode: AuthMode, scopes: ScopeSet) -> Self {
        Self {
            value: SecretString::new(value.into()),
            mode,
            scopes,
        }
    }

    /// The raw refresh token value.
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }
}
