//! Expiry-aware in-memory token cache.

use crate::scope::CacheKey;
use crate::token::{AccessToken, RefreshToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default minimum remaining validity for a cached token to be handed out.
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct CacheEntry {
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
}

/// Store of access and refresh tokens keyed by (mode, scope set).
///
/// Constructed once per process and shared (`Arc<TokenCache>`) between the
/// providers. All reads and writes go through one mutex; it is never held
/// across an await point.
#[derive(Debug)]
pub struct TokenCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    safety_buffer: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_BUFFER)
    }
}

impl TokenCache {
    /// Create an empty cache with the given safety buffer.
    pub fn new(safety_buffer: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            safety_buffer,
        }
    }

    /// Minimum remaining validity for a hit.
    pub fn safety_buffer(&self) -> Duration {
        self.safety_buffer
    }

    /// Get a fresh access token.
    ///
    /// Entries inside the safety buffer behave as a miss so the caller takes
    /// its renewal path.
    pub fn get(&self, key: &CacheKey) -> Option<AccessToken> {
        let entries = self.entries.lock();
        let token = entries.get(key)?.access.as_ref()?;
        if token.is_fresh(self.safety_buffer) {
            Some(token.clone())
        } else {
            debug!(key = %key, remaining_secs = token.remaining().as_secs(), "cached token inside safety buffer");
            None
        }
    }

    /// Get the refresh token stored for `key`, if any.
    pub fn refresh_token(&self, key: &CacheKey) -> Option<RefreshToken> {
        self.entries.lock().get(key)?.refresh.clone()
    }

    /// Store an access token and, optionally, a new refresh token.
    ///
    /// Passing `None` keeps any refresh token already held for the key, since
    /// servers that do not rotate refresh tokens omit them on refresh.
    pub fn put(&self, key: CacheKey, token: AccessToken, refresh: Option<RefreshToken>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_default();
        entry.access = Some(token);
        if refresh.is_some() {
            entry.refresh = refresh;
        }
    }

    /// Drop the refresh token for `key`, keeping the access token.
    pub fn discard_refresh_token(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let had = entry.refresh.take().is_some();
        if entry.access.is_none() {
            entries.remove(key);
        }
        had
    }

    /// Remove everything held for `key`.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of keys with any stored token (fresh or not).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
