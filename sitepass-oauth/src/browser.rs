//! Opening the authorization URL for the user.

use sitepass_core::{AuthError, AuthResult};
use url::Url;

/// Opens a URL for the person at the keyboard.
///
/// Injected into the user provider so tests can substitute a recording stub.
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`. Must not block on the user.
    fn open(&self, url: &Url) -> AuthResult<()>;
}

/// Launches the operating system's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> AuthResult<()> {
        open::that_detached(url.as_str())
            .map_err(|e| AuthError::configuration(format!("failed to launch browser: {e}")))
    }
}

/// Does nothing; the caller is expected to surface the URL some other way.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBrowser;

impl BrowserLauncher for NoopBrowser {
    fn open(&self, _url: &Url) -> AuthResult<()> {
        Ok(())
    }
}
