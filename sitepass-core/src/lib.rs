//! # sitepass-core
//!
//! Core types for dual-mode token acquisition.
//!
//! - **Errors**: [`AuthError`] and its [`AuthErrorKind`] classification
//! - **Scopes**: [`AuthMode`], normalised [`ScopeSet`]s and [`CacheKey`]s
//! - **Tokens**: [`AccessToken`] and [`RefreshToken`] with redacted `Debug`
//! - **Cache**: the expiry-aware [`TokenCache`] shared by both providers
//! - **PKCE**: [`PkceChallenge`] and [`OAuthSession`] for interactive flows
//! - **Config**: [`AuthSettings`] and the [`CredentialSupplier`] seam
//!
//! ## Example
//!
//! ```rust
//! use sitepass_core::{AccessToken, AuthMode, CacheKey, ScopeSet, TokenCache};
//! use std::time::Duration;
//!
//! let cache = TokenCache::default();
//! let scopes = ScopeSet::new(["data:write", "data:read"]).unwrap();
//! let key = CacheKey::new(AuthMode::Service, scopes.clone());
//!
//! let token = AccessToken::expiring_in("abc", "Bearer", Duration::from_secs(3600), scopes, AuthMode::Service);
//! cache.put(key.clone(), token, None);
//! assert!(cache.get(&key).is_some());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod pkce;
pub mod scope;
pub mod token;

pub use cache::{TokenCache, DEFAULT_SAFETY_BUFFER};
pub use config::{
    validate_redirect_uri, AuthSettings, CredentialSupplier, EnvCredentials,
    ServiceAccountCredentials, StaticCredentials, UserCredentials,
};
pub use error::{AuthError, AuthErrorKind, AuthResult};
pub use pkce::{code_challenge_s256, generate_state, OAuthSession, PkceChallenge, MAX_SESSION_TIMEOUT};
pub use scope::{AuthMode, CacheKey, ScopeSet};
pub use token::{AccessToken, RefreshToken};
