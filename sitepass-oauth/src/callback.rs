//! Single-shot loopback listener for the authorization redirect.
//!
//! The listener is a small state machine: it starts in
//! [`ListenerState::Waiting`] and leaves it exactly once, to `Resolved`,
//! `TimedOut` or `Errored`. The first request to the callback path that
//! carries a `state` parameter resolves it; anything after that gets a
//! "session already completed" page and cannot change the result.

use parking_lot::Mutex;
use sitepass_core::{validate_redirect_uri, AuthError, AuthResult};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

const MAX_REQUEST_HEAD: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

const CONFIRMATION_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>Authorization received</title></head>\n<body style=\"font-family: system-ui; text-align: center; padding: 50px;\">\n<h1>Authorization received</h1>\n<p>You can close this window and return to your agent.</p>\n</body>\n</html>";
const COMPLETED_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>Session completed</title></head>\n<body style=\"font-family: system-ui; text-align: center; padding: 50px;\">\n<h1>This sign-in session has already completed</h1>\n<p>You can close this window.</p>\n</body>\n</html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code, on success.
    pub code: Option<String>,
    /// Echoed `state` nonce.
    pub state: String,
    /// OAuth error code, on denial or failure.
    pub error: Option<String>,
    /// Optional error description.
    pub error_description: Option<String>,
}

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No callback yet.
    Waiting,
    /// A callback was accepted.
    Resolved,
    /// The deadline passed first.
    TimedOut,
    /// The socket failed.
    Errored,
}

type Outcome = AuthResult<CallbackParams>;

enum Slot {
    Waiting(oneshot::Sender<Outcome>),
    Done(ListenerState),
}

struct Shared {
    path: String,
    slot: Mutex<Slot>,
}

impl Shared {
    /// Leave `Waiting`. Returns false if the transition already happened.
    fn finish(&self, next: ListenerState, outcome: Option<Outcome>) -> bool {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Done(next)) {
            Slot::Waiting(tx) => {
                if let Some(outcome) = outcome {
                    let _ = tx.send(outcome);
                }
                true
            }
            done => {
                *slot = done;
                false
            }
        }
    }

    fn resolve(&self, params: CallbackParams) -> bool {
        self.finish(ListenerState::Resolved, Some(Ok(params)))
    }

    fn fail(&self, err: AuthError) -> bool {
        self.finish(ListenerState::Errored, Some(Err(err)))
    }

    fn time_out(&self) -> bool {
        self.finish(ListenerState::TimedOut, None)
    }

    fn state(&self) -> ListenerState {
        match &*self.slot.lock() {
            Slot::Waiting(_) => ListenerState::Waiting,
            Slot::Done(state) => *state,
        }
    }
}

/// Local HTTP responder bound to the registered redirect URI.
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    rx: oneshot::Receiver<Outcome>,
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("local_addr", &self.local_addr)
            .field("path", &self.shared.path)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl CallbackListener {
    /// Bind to the host and port of `redirect_uri`.
    ///
    /// Only requests for exactly the URI's path (case-sensitive) are
    /// considered callbacks.
    pub async fn bind(redirect_uri: &Url) -> AuthResult<Self> {
        validate_redirect_uri(redirect_uri)?;
        let port = redirect_uri
            .port()
            .ok_or_else(|| AuthError::configuration("redirect URI must name an explicit port"))?;
        let addr = match redirect_uri.host() {
            Some(url::Host::Ipv4(ip)) => SocketAddr::from((ip, port)),
            Some(url::Host::Ipv6(ip)) => SocketAddr::from((ip, port)),
            _ => SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        };

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            AuthError::configuration(format!("cannot bind callback listener on {addr}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::network(format!("callback listener has no local address: {e}")))?;
        debug!(addr = %local_addr, path = redirect_uri.path(), "callback listener bound");

        let (tx, rx) = oneshot::channel();
        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                path: redirect_uri.path().to_string(),
                slot: Mutex::new(Slot::Waiting(tx)),
            }),
            rx,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    /// Wait for the callback, at most `timeout`.
    ///
    /// The socket is closed before this returns, whatever the outcome.
    pub async fn wait(self, timeout: Duration) -> AuthResult<CallbackParams> {
        let Self {
            listener,
            local_addr,
            shared,
            mut rx,
        } = self;

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        let waited = tokio::time::timeout(timeout, &mut rx).await;

        accept_task.abort();
        // Awaiting the aborted task guarantees the listener has been dropped.
        let _ = accept_task.await;
        debug!(addr = %local_addr, state = ?shared.state(), "callback listener closed");

        match waited {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AuthError::Internal(
                "callback listener stopped without a result".to_string(),
            )),
            Err(_) if shared.time_out() => Err(AuthError::Timeout(timeout)),
            // Resolved in the instant between the deadline and the transition.
            Err(_) => rx.try_recv().unwrap_or_else(|_| {
                Err(AuthError::Internal("callback result was lost".to_string()))
            }),
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut failures = AcceptFailures::default();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                failures.reset();
                debug!(%peer, "callback connection accepted");
                tokio::spawn(handle_connection(stream, Arc::clone(&shared)));
            }
            Err(e) => match failures.record(&e) {
                AcceptRecovery::Retry(delay) => {
                    warn!(error = %e, retry_in = ?delay, "callback listener accept failed; retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                AcceptRecovery::GiveUp => {
                    warn!(error = %e, failures = failures.consecutive, "callback listener gave up accepting");
                    shared.fail(AuthError::network(format!("callback listener failed: {e}")));
                    return;
                }
            },
        }
    }
}

/// Consecutive listener-level accept failures tolerated before giving up.
const MAX_ACCEPT_FAILURES: u32 = 50;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, PartialEq, Eq)]
enum AcceptRecovery {
    Retry(Duration),
    GiveUp,
}

/// Tracks failed `accept` calls.
///
/// Errors tied to a single connection are retried at once. Anything else
/// (descriptor exhaustion and the like) backs off, and only a long unbroken
/// run of them ends the listener.
#[derive(Debug, Default)]
struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn record(&mut self, err: &std::io::Error) -> AcceptRecovery {
        use std::io::ErrorKind;

        if matches!(
            err.kind(),
            ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
        ) {
            return AcceptRecovery::Retry(Duration::ZERO);
        }

        self.consecutive += 1;
        if self.consecutive >= MAX_ACCEPT_FAILURES {
            AcceptRecovery::GiveUp
        } else {
            AcceptRecovery::Retry(ACCEPT_BACKOFF)
        }
    }
}

async fn handle_connection<S>(mut stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = match tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream)).await {
        Ok(Ok(head)) => head,
        _ => return,
    };

    let response = match parse_request(&head, &shared.path) {
        Ok(params) => {
            if shared.resolve(params) {
                http_response("200 OK", CONFIRMATION_HTML)
            } else {
                debug!("callback received after session completed");
                http_response("409 Conflict", COMPLETED_HTML)
            }
        }
        Err(rejection) => http_response(rejection.status, rejection.message),
    };
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request_head<S>(stream: &mut S) -> std::io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Debug, PartialEq, Eq)]
struct Rejection {
    status: &'static str,
    message: &'static str,
}

const NOT_FOUND: Rejection = Rejection {
    status: "404 Not Found",
    message: "Not found",
};

fn bad_request(message: &'static str) -> Rejection {
    Rejection {
        status: "400 Bad Request",
        message,
    }
}

/// Parse a request head into callback parameters.
fn parse_request(head: &str, expected_path: &str) -> Result<CallbackParams, Rejection> {
    let request_line = head.lines().next().ok_or_else(|| bad_request("Empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" {
        return Err(Rejection {
            status: "405 Method Not Allowed",
            message: "Only GET is accepted",
        });
    }
    if !target.starts_with('/') {
        return Err(bad_request("Malformed request target"));
    }

    let url = Url::parse(&format!("http://localhost{target}"))
        .map_err(|_| bad_request("Malformed request target"))?;
    if url.path() != expected_path {
        return Err(NOT_FOUND);
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(CallbackParams {
        code,
        state: state.ok_or_else(|| bad_request("Missing state parameter"))?,
        error,
        error_description,
    })
}

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::free_redirect_uri;
    use rstest::rstest;

    #[test]
    fn test_parse_success_callback() {
        let params = parse_request(
            "GET /callback?code=ABC123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n",
            "/callback",
        )
        .unwrap();
        assert_eq!(params.code.as_deref(), Some("ABC123"));
        assert_eq!(params.state, "xyz");
        assert!(params.error.is_none());
    }

    #[test]
    fn test_parse_error_callback_decodes_values() {
        let params = parse_request(
            "GET /callback?error=access_denied&error_description=user%20said%20no&state=xyz HTTP/1.1\r\n\r\n",
            "/callback",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("user said no"));
        assert!(params.code.is_none());
    }

    #[rstest]
    #[case::wrong_path("GET /favicon.ico HTTP/1.1\r\n\r\n", "404 Not Found")]
    #[case::case_mismatch("GET /Callback?code=a&state=b HTTP/1.1\r\n\r\n", "404 Not Found")]
    #[case::missing_state("GET /callback?code=a HTTP/1.1\r\n\r\n", "400 Bad Request")]
    #[case::post("POST /callback?code=a&state=b HTTP/1.1\r\n\r\n", "405 Method Not Allowed")]
    #[case::absolute_form("GET http://evil/callback?code=a&state=b HTTP/1.1\r\n\r\n", "400 Bad Request")]
    #[case::empty("", "400 Bad Request")]
    fn test_parse_rejections(#[case] head: &str, #[case] status: &str) {
        let rejection = parse_request(head, "/callback").unwrap_err();
        assert_eq!(rejection.status, status);
    }

    #[rstest]
    #[case::aborted(std::io::ErrorKind::ConnectionAborted)]
    #[case::reset(std::io::ErrorKind::ConnectionReset)]
    #[case::interrupted(std::io::ErrorKind::Interrupted)]
    fn test_connection_level_accept_errors_retry_immediately(#[case] kind: std::io::ErrorKind) {
        let mut failures = AcceptFailures::default();
        for _ in 0..(MAX_ACCEPT_FAILURES * 2) {
            assert_eq!(
                failures.record(&std::io::Error::from(kind)),
                AcceptRecovery::Retry(Duration::ZERO)
            );
        }
        assert_eq!(failures.consecutive, 0);
    }

    #[test]
    fn test_descriptor_exhaustion_backs_off_then_gives_up() {
        // EMFILE has no stable ErrorKind; it surfaces as a raw OS error.
        let emfile = || std::io::Error::from_raw_os_error(24);
        let mut failures = AcceptFailures::default();
        for _ in 1..MAX_ACCEPT_FAILURES {
            assert_eq!(failures.record(&emfile()), AcceptRecovery::Retry(ACCEPT_BACKOFF));
        }
        assert_eq!(failures.record(&emfile()), AcceptRecovery::GiveUp);
    }

    #[test]
    fn test_successful_accept_resets_failure_run() {
        let emfile = || std::io::Error::from_raw_os_error(24);
        let mut failures = AcceptFailures::default();
        for _ in 1..MAX_ACCEPT_FAILURES {
            failures.record(&emfile());
        }
        failures.reset();
        assert_eq!(failures.record(&emfile()), AcceptRecovery::Retry(ACCEPT_BACKOFF));
    }

    #[test]
    fn test_state_machine_leaves_waiting_once() {
        let (tx, mut rx) = oneshot::channel();
        let shared = Shared {
            path: "/callback".into(),
            slot: Mutex::new(Slot::Waiting(tx)),
        };
        let params = CallbackParams {
            code: Some("a".into()),
            state: "s".into(),
            error: None,
            error_description: None,
        };

        assert_eq!(shared.state(), ListenerState::Waiting);
        assert!(shared.resolve(params.clone()));
        assert!(!shared.resolve(CallbackParams {
            code: Some("b".into()),
            ..params.clone()
        }));
        assert!(!shared.time_out());
        assert_eq!(shared.state(), ListenerState::Resolved);
        assert_eq!(rx.try_recv().unwrap().unwrap(), params);
    }

    #[tokio::test]
    async fn test_late_request_gets_completed_page() {
        let shared = Arc::new(Shared {
            path: "/callback".into(),
            slot: Mutex::new(Slot::Done(ListenerState::Resolved)),
        });

        let (mut client, server) = tokio::io::duplex(4096);
        let handler = tokio::spawn(handle_connection(server, Arc::clone(&shared)));
        client
            .write_all(b"GET /callback?code=late&state=s HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        handler.await.unwrap();

        assert!(response.starts_with("HTTP/1.1 409 Conflict"));
        assert!(response.contains("already completed"));
        assert_eq!(shared.state(), ListenerState::Resolved);
    }

    #[tokio::test]
    async fn test_resolves_first_matching_request_and_releases_port() {
        let redirect = free_redirect_uri("/callback");
        let listener = CallbackListener::bind(&redirect).await.unwrap();
        let addr = listener.local_addr();
        assert_eq!(listener.state(), ListenerState::Waiting);

        let waiter = tokio::spawn(listener.wait(Duration::from_secs(5)));

        let stray = reqwest::get(format!("http://{addr}/favicon.ico")).await.unwrap();
        assert_eq!(stray.status().as_u16(), 404);

        let page = reqwest::get(format!("http://{addr}/callback?code=ABC123&state=s1"))
            .await
            .unwrap();
        assert_eq!(page.status().as_u16(), 200);
        assert!(page.text().await.unwrap().contains("Authorization received"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code.as_deref(), Some("ABC123"));
        assert_eq!(params.state, "s1");

        assert!(tokio::net::TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_callback_still_gets_confirmation_page() {
        let redirect = free_redirect_uri("/oauth/callback");
        let listener = CallbackListener::bind(&redirect).await.unwrap();
        let addr = listener.local_addr();
        let waiter = tokio::spawn(listener.wait(Duration::from_secs(5)));

        let page = reqwest::get(format!(
            "http://{addr}/oauth/callback?error=access_denied&state=s1"
        ))
        .await
        .unwrap();
        assert_eq!(page.status().as_u16(), 200);

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
    }

    #[tokio::test]
    async fn test_timeout_closes_socket() {
        let redirect = free_redirect_uri("/callback");
        let listener = CallbackListener::bind(&redirect).await.unwrap();
        let addr = listener.local_addr();

        let err = listener.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(tokio::net::TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_rejects_non_loopback_redirect() {
        let redirect = Url::parse("http://example.com:8910/callback").unwrap();
        let err = CallbackListener::bind(&redirect).await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_configuration_error() {
        let redirect = free_redirect_uri("/callback");
        let _first = CallbackListener::bind(&redirect).await.unwrap();
        let err = CallbackListener::bind(&redirect).await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }
}
