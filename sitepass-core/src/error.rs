//! Error types for token acquisition.
//!
//! Every failure is reported through [`AuthError`]. Each variant maps to one
//! [`AuthErrorKind`], which is what gets logged; provider descriptions are
//! carried along but token values and secrets never are.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for sitepass operations.
///
/// `Clone` so that a single renewal result can be handed to every caller
/// waiting on the same in-flight flow.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Missing or malformed credentials, key material, or settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied invalid input (e.g. an empty scope list).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure reaching an endpoint.
    #[error("Network error: {0}")]
    Network(String),

    /// The authorization server rejected the assertion, grant, or client.
    #[error("Authentication rejected (HTTP {status}): {}", describe(.error, .description))]
    Authentication {
        /// OAuth error code (e.g. `invalid_grant`).
        error: String,
        /// Provider supplied `error_description`.
        description: Option<String>,
        /// HTTP status returned by the token endpoint.
        status: u16,
    },

    /// The user refused consent, or the authorization server reported an
    /// error on the redirect.
    #[error("Authorization denied: {}", describe(.error, .description))]
    UserDenied {
        /// OAuth error code from the callback (e.g. `access_denied`).
        error: String,
        /// Optional `error_description` from the callback.
        description: Option<String>,
    },

    /// The callback did not correlate with the pending session.
    #[error("Security error: {0}")]
    Security(String),

    /// No callback arrived before the session deadline.
    #[error("Timed out after {}s waiting for the authorization callback", .0.as_secs())]
    Timeout(Duration),

    /// The provider answered with a malformed or incomplete response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A renewal task ended without producing a result.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe(error: &str, description: &Option<String>) -> String {
    match description {
        Some(desc) if !desc.is_empty() => format!("{error}: {desc}"),
        _ => error.to_string(),
    }
}

/// Result type alias using [`AuthError`].
pub type AuthResult<T> = Result<T, AuthError>;

/// Coarse classification of an [`AuthError`], suitable as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// See [`AuthError::Configuration`].
    Configuration,
    /// See [`AuthError::Validation`].
    Validation,
    /// See [`AuthError::Network`].
    Network,
    /// See [`AuthError::Authentication`].
    Authentication,
    /// See [`AuthError::UserDenied`].
    UserDenied,
    /// See [`AuthError::Security`].
    Security,
    /// See [`AuthError::Timeout`].
    Timeout,
    /// See [`AuthError::Protocol`].
    Protocol,
    /// See [`AuthError::Internal`].
    Internal,
}

impl AuthErrorKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::UserDenied => "user_denied",
            Self::Security => "security",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a security error.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Create an authentication error from an OAuth error body.
    pub fn authentication(status: u16, error: impl Into<String>, description: Option<String>) -> Self {
        Self::Authentication {
            error: error.into(),
            description,
            status,
        }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::Configuration(_) => AuthErrorKind::Configuration,
            Self::Validation(_) => AuthErrorKind::Validation,
            Self::Network(_) => AuthErrorKind::Network,
            Self::Authentication { .. } => AuthErrorKind::Authentication,
            Self::UserDenied { .. } => AuthErrorKind::UserDenied,
            Self::Security(_) => AuthErrorKind::Security,
            Self::Timeout(_) => AuthErrorKind::Timeout,
            Self::Protocol(_) => AuthErrorKind::Protocol,
            Self::Internal(_) => AuthErrorKind::Internal,
        }
    }

    /// Whether this error ends the current interactive invocation.
    ///
    /// A later call starts over with a fresh session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UserDenied { .. } | Self::Security(_) | Self::Timeout(_)
        )
    }

    /// Whether the server reported `invalid_grant`.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::Authentication { error, .. } if error == "invalid_grant")
    }

    /// The provider supplied description, if any.
    pub fn provider_description(&self) -> Option<&str> {
        match self {
            Self::Authentication { description, .. } | Self::UserDenied { description, .. } => {
                description.as_deref()
            }
            _ => None,
        }
    }

    /// Actionable message for a tool to show the person driving the agent.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => {
                format!("Authentication is not configured correctly ({msg}). Check the client and key settings.")
            }
            Self::Validation(msg) => format!("The token request was invalid: {msg}."),
            Self::Network(_) => {
                "Could not reach the authorization server. Check your network connection and retry."
                    .to_string()
            }
            Self::Authentication { .. } => {
                "The authorization server rejected the credentials. Verify the app and service account setup."
                    .to_string()
            }
            Self::UserDenied { .. } => {
                "Access was not granted in the browser. Retry and approve the request to continue."
                    .to_string()
            }
            Self::Security(_) => {
                "The sign-in response did not match this session and was discarded. Retry the sign-in."
                    .to_string()
            }
            Self::Timeout(_) => {
                "The browser window was closed or sign-in was not completed in time. Retry?".to_string()
            }
            Self::Protocol(_) => {
                "The authorization server returned an unexpected response. Retry later.".to_string()
            }
            Self::Internal(_) => "Token acquisition failed unexpectedly. Retry.".to_string(),
        }
    }
}
