//! PKCE verifier/challenge generation and interactive session state.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// The only challenge method issued.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind a verifier; 64 bytes encode to 86 characters.
const VERIFIER_BYTES: usize = 64;
const STATE_BYTES: usize = 32;

/// Longest deadline a session accepts; larger timeouts are clamped to it.
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// A PKCE verifier and its S256 challenge.
///
/// Generated fresh per interactive attempt.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    code_verifier: SecretString,
    /// `base64url(sha256(code_verifier))`, sent on the authorization URL.
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a new random verifier and its challenge.
    pub fn generate() -> Self {
        let code_verifier = random_urlsafe(VERIFIER_BYTES);
        let code_challenge = code_challenge_s256(&code_verifier);
        Self {
            code_verifier: SecretString::new(code_verifier),
            code_challenge,
        }
    }

    /// The verifier, sent only on the code exchange.
    pub fn code_verifier(&self) -> &str {
        self.code_verifier.expose_secret()
    }

    /// Always `S256`.
    pub fn method(&self) -> &'static str {
        CODE_CHALLENGE_METHOD
    }
}

/// Compute the S256 challenge for a verifier.
pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate an unguessable `state` nonce.
pub fn generate_state() -> String {
    random_urlsafe(STATE_BYTES)
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// State of one interactive authorization attempt.
///
/// Owned by the flow that created it and dropped when that flow finishes,
/// whatever the outcome.
#[derive(Debug)]
pub struct OAuthSession {
    /// CSRF nonce round-tripped through the redirect.
    pub state: String,
    /// PKCE pair for this attempt.
    pub pkce: PkceChallenge,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Length of the deadline, after clamping.
    pub timeout: Duration,
    /// Monotonic deadline for the callback.
    pub deadline: Instant,
}

impl OAuthSession {
    /// Start a session that must complete within `timeout`, at most
    /// [`MAX_SESSION_TIMEOUT`].
    pub fn new(timeout: Duration) -> Self {
        let timeout = timeout.min(MAX_SESSION_TIMEOUT);
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        Self {
            state: generate_state(),
            pkce: PkceChallenge::generate(),
            created_at: Utc::now(),
            timeout,
            deadline,
        }
    }

    /// Time left before the deadline, saturating at zero.
    pub fn time_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
