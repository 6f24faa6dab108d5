//! # sitepass
//!
//! Dual-mode OAuth token lifecycle for tool-calling agents.
//!
//! A tool that needs an access token asks the [`TokenBroker`] for one in a
//! given [`AuthMode`]:
//!
//! - **Service** - a service account signs a JWT assertion and trades it for
//!   a token; no human involved
//! - **User** - a human consents once in the browser (authorization code +
//!   PKCE); afterwards tokens are renewed silently with the refresh token
//!
//! Both modes share one expiry-aware cache keyed by mode and normalised scope
//! set, and concurrent requests for the same user scopes share one flow.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sitepass::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> AuthResult<()> {
//!     sitepass::init_tracing();
//!
//!     let broker = TokenBroker::from_env()?;
//!     let token = broker.get_token(AuthMode::User, ["data:read"]).await?;
//!     println!("{}", token.authorization_header());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`sitepass_core`] - errors, scopes, tokens, cache, PKCE, configuration
//! - [`sitepass_oauth`] - token endpoint, service-account and user providers,
//!   loopback callback listener, browser launch

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod broker;
pub mod telemetry;

pub use sitepass_core as core;
pub use sitepass_oauth as oauth;

pub use broker::TokenBroker;
pub use telemetry::{init_json_tracing, init_tracing};

pub use sitepass_core::{
    AccessToken, AuthError, AuthErrorKind, AuthMode, AuthResult, AuthSettings, CredentialSupplier,
    EnvCredentials, ScopeSet, ServiceAccountCredentials, StaticCredentials, TokenCache,
    UserCredentials,
};
pub use sitepass_oauth::{
    BrowserLauncher, NoopBrowser, OAuthUserTokenProvider, ServiceAccountTokenProvider,
    SystemBrowser,
};

/// Convenient prelude for common imports.
///
/// ```ignore
/// use sitepass::prelude::*;
/// ```
pub mod prelude {
    pub use crate::broker::TokenBroker;
    pub use crate::core::{
        AccessToken, AuthError, AuthMode, AuthResult, AuthSettings, CredentialSupplier,
        EnvCredentials, ScopeSet, StaticCredentials, TokenCache,
    };
    pub use crate::oauth::{BrowserLauncher, SystemBrowser};
}
