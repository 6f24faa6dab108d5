//! Shared fixtures for unit tests.

use crate::browser::BrowserLauncher;
use parking_lot::Mutex;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use sitepass_core::AuthResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use url::Url;

pub(crate) struct TestKey {
    pub(crate) private_pem: String,
    pub(crate) public_pem: String,
}

/// One RSA key per test binary; generation is slow.
pub(crate) fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
        let private_pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode private key")
            .as_str()
            .to_owned();
        let public_pem = private
            .to_public_key()
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode public key");
        TestKey {
            private_pem,
            public_pem,
        }
    })
}

/// A loopback redirect URI on a port that was free a moment ago.
pub(crate) fn free_redirect_uri(path: &str) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}{path}")).expect("redirect uri")
}

/// What the simulated browser does with the authorization URL.
#[derive(Clone, Debug)]
pub(crate) enum BrowserAction {
    /// Nothing; the flow has to time out.
    Ignore,
    /// Redirect with `code` and the session's own state.
    Approve { code: String },
    /// Redirect with a fixed (wrong) state.
    ApproveWithState { code: String, state: String },
    /// Redirect with an OAuth error.
    Deny { error: String, description: String },
    /// Redirect with the session's state and nothing else.
    StateOnly,
}

/// Records every launch and replays the redirect the way a browser would.
pub(crate) struct RecordingBrowser {
    action: BrowserAction,
    launches: AtomicUsize,
    urls: Mutex<Vec<Url>>,
}

impl RecordingBrowser {
    pub(crate) fn new(action: BrowserAction) -> Arc<Self> {
        Arc::new(Self {
            action,
            launches: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn last_url(&self) -> Option<Url> {
        self.urls.lock().last().cloned()
    }
}

pub(crate) fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &Url) -> AuthResult<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());

        let redirect = query_param(url, "redirect_uri").expect("redirect_uri on authorization url");
        let state = query_param(url, "state").expect("state on authorization url");
        let mut callback = Url::parse(&redirect).expect("redirect uri parses");
        match &self.action {
            BrowserAction::Ignore => return Ok(()),
            BrowserAction::Approve { code } => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &state);
            }
            BrowserAction::ApproveWithState { code, state } => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", state);
            }
            BrowserAction::Deny { error, description } => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("error_description", description)
                    .append_pair("state", &state);
            }
            BrowserAction::StateOnly => {
                callback.query_pairs_mut().append_pair("state", &state);
            }
        }
        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
        Ok(())
    }
}
