//! Token providers for sitepass.
//!
//! Two ways to get an access token, both writing to a shared
//! [`TokenCache`](sitepass_core::TokenCache):
//!
//! - **Service account** - [`ServiceAccountTokenProvider`] signs an RS256 JWT
//!   assertion and trades it at the token endpoint (JWT bearer grant)
//! - **User** - [`OAuthUserTokenProvider`] silently refreshes when it can and
//!   otherwise runs the authorization-code flow with PKCE through a loopback
//!   [`CallbackListener`] and a [`BrowserLauncher`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitepass_core::{AuthSettings, TokenCache, UserCredentials};
//! use sitepass_oauth::{OAuthUserTokenProvider, SystemBrowser};
//! use std::sync::Arc;
//!
//! let settings = AuthSettings::from_env()?;
//! let creds = UserCredentials::new("my-app", "http://127.0.0.1:8910/callback".parse()?)?;
//! let provider = OAuthUserTokenProvider::new(
//!     creds,
//!     &settings,
//!     Arc::new(TokenCache::new(settings.safety_buffer)),
//!     Arc::new(SystemBrowser),
//! )?;
//!
//! let token = provider.get_token(["data:read"]).await?;
//! let header = token.authorization_header();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod browser;
pub mod callback;
pub mod endpoint;
pub mod service_account;
pub mod user;

#[cfg(test)]
mod test_support;

pub use browser::{BrowserLauncher, NoopBrowser, SystemBrowser};
pub use callback::{CallbackListener, CallbackParams, ListenerState};
pub use endpoint::{ClientAuth, TokenEndpoint, TokenResponse};
pub use service_account::{AssertionClaims, ServiceAccountTokenProvider};
pub use user::OAuthUserTokenProvider;
