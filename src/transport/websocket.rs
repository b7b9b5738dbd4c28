//! WebSocket link to the controller.
//!
//! One connection runs exactly one receive loop. Each inbound frame is
//! dispatched and its reply written before the next frame is read, so
//! replies leave in request order and at most one tool runs at a time.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -+-> ClosingLocal  -+-> Closed
//!                                          +-> ClosingRemote -+
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::config::Credentials;
use crate::commands::Dispatcher;
use crate::error::ConnectError;
use crate::security::AuditLogger;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long a local shutdown waits for the peer to answer our close frame.
pub const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ClosingLocal,
    ClosingRemote,
    Closed,
}

/// How a session ended, for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// We initiated the close. `acknowledged` is false when the peer did not
    /// answer within [`CLOSE_ACK_TIMEOUT`] and the socket was dropped.
    LocalShutdown { acknowledged: bool },
    /// The controller sent a close frame.
    ClosedByPeer,
    /// Read or write failure, or the socket vanished without a close frame.
    TransportError(String),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalShutdown { acknowledged: true } => write!(f, "disconnected"),
            Self::LocalShutdown { acknowledged: false } => {
                write!(f, "disconnected (server did not acknowledge close)")
            }
            Self::ClosedByPeer => write!(f, "connection closed by server"),
            Self::TransportError(e) => write!(f, "connection lost: {e}"),
        }
    }
}

/// Attach `token` and `session` query parameters to the base URL,
/// replacing any already present.
pub fn build_url(base: &str, credentials: &Credentials) -> Result<Url, ConnectError> {
    let mut url = Url::parse(base).map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ConnectError::InvalidUrl(format!(
                "unsupported scheme '{other}', expected ws or wss"
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(ConnectError::InvalidUrl("missing host".into()));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "token" && k != "session")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("token", &credentials.auth_token)
        .append_pair("session", &credentials.session_token);
    Ok(url)
}

/// The URL without its query string, safe to log.
fn endpoint_of(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

fn transition(state: &mut ConnectionState, next: ConnectionState, endpoint: &str) {
    debug!(from = ?*state, to = ?next, endpoint, "connection state");
    *state = next;
}

/// Open the link. Fails with `InvalidUrl` before any network activity when
/// the base URL is unusable.
pub async fn connect(base_url: &str, credentials: &Credentials) -> Result<Connection, ConnectError> {
    let mut state = ConnectionState::Disconnected;
    let url = build_url(base_url, credentials)?;
    let endpoint = endpoint_of(&url);

    transition(&mut state, ConnectionState::Connecting, &endpoint);
    let (ws, response) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            transition(&mut state, ConnectionState::Closed, &endpoint);
            return Err(ConnectError::ConnectFailed(e));
        }
    };
    transition(&mut state, ConnectionState::Connected, &endpoint);

    info!(endpoint = %endpoint, status = %response.status(), "connected");
    let audit = AuditLogger::new();
    audit.connection_opened(&endpoint);

    Ok(Connection {
        state,
        endpoint,
        ws,
        audit,
    })
}

/// An established link, ready to serve commands.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    endpoint: String,
    ws: WsStream,
    audit: AuditLogger,
}

/// Why the receive loop stopped.
#[derive(Debug)]
enum LoopEnd {
    PeerClosed,
    Failed(String),
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serve commands until `shutdown` resolves or the link ends.
    ///
    /// On `shutdown` a normal-closure frame is sent and the peer gets
    /// [`CLOSE_ACK_TIMEOUT`] to answer before the socket is dropped.
    pub async fn run<F>(self, dispatcher: Dispatcher, shutdown: F) -> SessionOutcome
    where
        F: Future<Output = ()>,
    {
        let Connection {
            mut state,
            endpoint,
            ws,
            audit,
        } = self;

        let (sink, source) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let mut receiver = tokio::spawn(receive_loop(source, Arc::clone(&sink), dispatcher));
        tokio::pin!(shutdown);

        let outcome = tokio::select! {
            ended = &mut receiver => {
                let end = ended.unwrap_or_else(|e| LoopEnd::Failed(format!("receive loop aborted: {e}")));
                match end {
                    LoopEnd::PeerClosed => {
                        transition(&mut state, ConnectionState::ClosingRemote, &endpoint);
                        SessionOutcome::ClosedByPeer
                    }
                    LoopEnd::Failed(e) => SessionOutcome::TransportError(e),
                }
            }
            () = &mut shutdown => {
                transition(&mut state, ConnectionState::ClosingLocal, &endpoint);
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                }));
                // Sending can block behind an in-flight reply, so the whole
                // exchange shares one deadline.
                let handshake = async {
                    if let Err(e) = sink.lock().await.send(close).await {
                        warn!(error = %e, "error sending close frame");
                    }
                    let _ = (&mut receiver).await;
                };
                match tokio::time::timeout(CLOSE_ACK_TIMEOUT, handshake).await {
                    Ok(()) => SessionOutcome::LocalShutdown { acknowledged: true },
                    Err(_) => {
                        warn!(timeout_ms = CLOSE_ACK_TIMEOUT.as_millis() as u64, "no close acknowledgement, forcing close");
                        receiver.abort();
                        SessionOutcome::LocalShutdown { acknowledged: false }
                    }
                }
            }
        };

        transition(&mut state, ConnectionState::Closed, &endpoint);
        audit.connection_closed(&endpoint, &outcome.to_string());
        outcome
    }
}

async fn receive_loop(mut source: WsSource, sink: Arc<Mutex<WsSink>>, dispatcher: Dispatcher) -> LoopEnd {
    let mut close_seen = false;
    loop {
        let frame = match source.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                log_close_frame(frame.as_ref());
                close_seen = true;
                // Keep polling so tungstenite flushes its close reply.
                continue;
            }
            // Pings are answered by tungstenite on the next read.
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                return if close_seen {
                    LoopEnd::PeerClosed
                } else {
                    warn!("connection dropped without close frame");
                    LoopEnd::Failed("connection dropped without close frame".into())
                };
            }
            Some(Err(e)) => {
                if close_seen {
                    return LoopEnd::PeerClosed;
                }
                warn!(error = %e, "websocket error");
                return LoopEnd::Failed(e.to_string());
            }
        };

        let Some(reply) = dispatcher.dispatch(&frame).await else {
            continue;
        };
        if let Err(e) = sink.lock().await.send(Message::Text(reply)).await {
            warn!(error = %e, "failed to send result");
            return LoopEnd::Failed(format!("failed to send result: {e}"));
        }
    }
}

fn log_close_frame(frame: Option<&CloseFrame<'_>>) {
    match frame {
        Some(f) if !matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
            warn!(code = u16::from(f.code), reason = %f.reason, "unexpected close code");
        }
        Some(f) => debug!(code = u16::from(f.code), reason = %f.reason, "close frame received"),
        None => debug!("close frame received"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("auth tok", "sess&1")
    }

    #[test]
    fn url_carries_credentials() {
        let url = build_url("ws://localhost:3000/api/ws", &creds()).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "auth tok".to_string()),
                ("session".to_string(), "sess&1".to_string()),
            ]
        );
        assert_eq!(url.path(), "/api/ws");
    }

    #[test]
    fn url_keeps_other_params_and_replaces_credentials() {
        let url = build_url("wss://h.example/ws?v=2&token=old", &creds()).unwrap();
        let query = url.query().unwrap();
        assert!(query.starts_with("v=2&"));
        assert!(!query.contains("old"));
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "token").count(), 1);
    }

    #[test]
    fn rejects_bad_urls_before_connecting() {
        for bad in ["not a url", "http://localhost/ws", "ws://", ""] {
            assert!(
                matches!(build_url(bad, &creds()), Err(ConnectError::InvalidUrl(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn endpoint_hides_credentials() {
        let url = build_url("ws://localhost:3000/api/ws", &creds()).unwrap();
        let shown = endpoint_of(&url);
        assert_eq!(shown, "ws://localhost:3000/api/ws");
    }

    #[tokio::test]
    async fn invalid_url_fails_without_network() {
        let err = connect("ftp://example.com", &creds()).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_failed() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(&format!("ws://127.0.0.1:{port}/ws"), &creds())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::ConnectFailed(_)));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(SessionOutcome::ClosedByPeer.to_string(), "connection closed by server");
        assert_eq!(
            SessionOutcome::LocalShutdown { acknowledged: true }.to_string(),
            "disconnected"
        );
        assert!(SessionOutcome::TransportError("reset".into())
            .to_string()
            .contains("reset"));
    }
}
