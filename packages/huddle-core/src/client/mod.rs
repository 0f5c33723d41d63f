//! # Signaling Client
//!
//! One authenticated WebSocket channel to the relay.
//!
//! ```text
//!   SignalingClient::connect(context)
//!        │
//!        ├── upgrade request carries the credential (cookie or bearer)
//!        │     401 ──────────────────────────────► Error::Unauthenticated
//!        │     other failure ────────────────────► Error::ConnectionFailed
//!        │
//!        ├── first frame must be `connected` ────► connection id + identity
//!        │     (whole handshake bounded) ────────► Error::Timeout
//!        │
//!        ├── writer task: outbox (mpsc) ─────────► socket
//!        └── reader task: socket ────────────────► events (mpsc)
//! ```
//!
//! The events receiver yields `None` once the transport is gone; that is the
//! signal for [`ReconnectCoordinator::recover`].

pub mod reconnect;

#[cfg(test)]
pub(crate) mod test_relay;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::connect_async;

pub use reconnect::{ReconnectCoordinator, ReconnectPolicy, DEFAULT_CONNECT_TIMEOUT};

use crate::error::{Error, Result};
use crate::identity::PublicIdentity;
use crate::peer::OutboundSignal;
use crate::protocol::{ClientMessage, ConnectionId, ServerMessage};

/// Default cookie the relay reads the credential from.
pub const DEFAULT_COOKIE_NAME: &str = "jwt";

/// Receiver of relay frames for one channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerMessage>;

/// How the credential is attached to the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// `Cookie: <name>=<token>`
    Cookie(String),
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl Default for CredentialPlacement {
    fn default() -> Self {
        CredentialPlacement::Cookie(DEFAULT_COOKIE_NAME.to_string())
    }
}

/// Everything needed to open a channel: where, and as whom.
///
/// Passed in at construction and replaced through
/// [`ReconnectCoordinator::reauthenticate`]; never read from globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// WebSocket URL of the relay, e.g. `ws://localhost:8080/ws`
    pub server_url: String,
    /// Bearer credential issued by the account service
    pub credential: String,
    /// Where the credential goes in the handshake
    pub placement: CredentialPlacement,
}

impl ClientContext {
    pub fn new(server_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            credential: credential.into(),
            placement: CredentialPlacement::default(),
        }
    }

    pub fn with_placement(mut self, placement: CredentialPlacement) -> Self {
        self.placement = placement;
        self
    }
}

/// An open, authenticated channel to the relay.
pub struct SignalingClient {
    connection_id: ConnectionId,
    identity: PublicIdentity,
    outbox: mpsc::UnboundedSender<ClientMessage>,
    writer_task: AbortHandle,
    reader_task: JoinHandle<()>,
}

impl SignalingClient {
    /// Open a channel and wait for the relay's `connected` frame, giving up
    /// after [`DEFAULT_CONNECT_TIMEOUT`].
    ///
    /// The `connected` frame is also the first item on the returned receiver,
    /// so a `PeerStore` fed from it resets itself for the new connection.
    pub async fn connect(context: &ClientContext) -> Result<(Self, EventReceiver)> {
        Self::connect_with_timeout(context, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// [`connect`](Self::connect) with an explicit bound on the upgrade and
    /// the wait for `connected`.
    pub async fn connect_with_timeout(
        context: &ClientContext,
        timeout: Duration,
    ) -> Result<(Self, EventReceiver)> {
        tokio::time::timeout(timeout, Self::handshake(context))
            .await
            .map_err(|_| Error::Timeout("relay connect".into()))?
    }

    async fn handshake(context: &ClientContext) -> Result<(Self, EventReceiver)> {
        let mut request = context
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let (name, value) = match &context.placement {
            CredentialPlacement::Cookie(cookie) => {
                (header::COOKIE, format!("{}={}", cookie, context.credential))
            }
            CredentialPlacement::Bearer => {
                (header::AUTHORIZATION, format!("Bearer {}", context.credential))
            }
        };
        let value = HeaderValue::from_str(&value)
            .map_err(|_| Error::Unauthenticated("credential is not a valid header value".into()))?;
        request.headers_mut().insert(name, value);

        let (ws_stream, _) = connect_async(request).await.map_err(|e| match e {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                Error::Unauthenticated("relay rejected the credential".into())
            }
            other => Error::ConnectionFailed(other.to_string()),
        })?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // The relay's first frame names this connection.
        let first = loop {
            match ws_receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => break serde_json::from_str::<ServerMessage>(&text)?,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(Error::ConnectionFailed("relay closed during handshake".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::ConnectionFailed(e.to_string())),
            }
        };
        let (connection_id, identity) = match &first {
            ServerMessage::Connected {
                connection_id,
                identity,
            } => (connection_id.clone(), identity.clone()),
            other => {
                return Err(Error::Protocol(format!(
                    "expected connected frame, got {:?}",
                    other
                )))
            }
        };

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let _ = events_tx.send(first);

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize client message: {}", e);
                    }
                }
            }
            let _ = ws_sender.close().await;
        })
        .abort_handle();

        let writer = writer_task.clone();
        let reader_connection_id = connection_id.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg_result) = ws_receiver.next().await {
                match msg_result {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            if events_tx.send(server_msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                connection_id = reader_connection_id.as_str(),
                                error = %e,
                                "Failed to parse relay frame"
                            );
                        }
                    },
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!(connection_id = reader_connection_id.as_str(), "Relay closed the channel");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            connection_id = reader_connection_id.as_str(),
                            error = %e,
                            "Relay WebSocket error"
                        );
                        break;
                    }
                    _ => {}
                }
            }
            writer.abort();
        });

        tracing::info!(connection_id = connection_id.as_str(), "Connected to relay");

        Ok((
            Self {
                connection_id,
                identity,
                outbox,
                writer_task,
                reader_task,
            },
            events_rx,
        ))
    }

    /// Server-assigned id of this channel.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The identity the relay attached to this channel.
    pub fn identity(&self) -> &PublicIdentity {
        &self.identity
    }

    /// Whether the transport is still up.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Queue a frame for the relay.
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbox.send(msg).map_err(|_| Error::NotConnected)
    }

    pub fn join_call(&self, call_id: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::JoinCall {
            call_id: call_id.into(),
        })
    }

    pub fn leave_call(&self) -> Result<()> {
        self.send(ClientMessage::LeaveCall)
    }

    /// Forward a signal produced by a peer connection.
    pub fn send_signal(&self, signal: OutboundSignal) -> Result<()> {
        self.send(ClientMessage::Signal {
            target_connection_id: signal.target_connection_id,
            kind: signal.kind,
            payload: signal.payload,
        })
    }

    pub fn send_chat(&self, body: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::Chat { body: body.into() })
    }

    pub fn ping(&self) -> Result<()> {
        self.send(ClientMessage::Ping)
    }

    /// Tear the channel down. The relay runs `leave` for this connection when
    /// the socket closes.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::test_relay::TestRelay;
    use super::*;
    use crate::protocol::SignalKind;

    #[tokio::test]
    async fn test_connect_reads_connection_id_from_first_frame() {
        let relay = TestRelay::start().await;
        let context = ClientContext::new(relay.url(), "good-alice");

        let (client, mut events) = SignalingClient::connect(&context).await.unwrap();
        assert_eq!(client.connection_id(), "conn-1");
        assert_eq!(client.identity().name, "alice");
        assert!(client.is_open());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Connected { ref connection_id, .. } if connection_id == "conn-1"));
    }

    #[tokio::test]
    async fn test_bearer_placement_is_accepted() {
        let relay = TestRelay::start().await;
        let context =
            ClientContext::new(relay.url(), "good-bob").with_placement(CredentialPlacement::Bearer);

        let (client, _events) = SignalingClient::connect(&context).await.unwrap();
        assert_eq!(client.identity().name, "bob");
    }

    #[tokio::test]
    async fn test_silent_relay_times_out() {
        // Accepts the upgrade but never sends `connected`.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        let context = ClientContext::new(format!("ws://{}/ws", addr), "good-alice");
        let err = SignalingClient::connect_with_timeout(&context, Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_recoverable());
        server.abort();
    }

    #[tokio::test]
    async fn test_rejected_credential_is_unauthenticated() {
        let relay = TestRelay::start().await;
        let context = ClientContext::new(relay.url(), "expired");

        let err = SignalingClient::connect(&context).await.err().unwrap();
        assert!(matches!(err, Error::Unauthenticated(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_connection_failed() {
        let relay = TestRelay::start().await;
        let url = relay.url();
        drop(relay);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = SignalingClient::connect(&ClientContext::new(url, "good-alice"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_frames_reach_the_relay_in_order() {
        let relay = TestRelay::start().await;
        let (client, _events) = SignalingClient::connect(&ClientContext::new(relay.url(), "good-alice"))
            .await
            .unwrap();

        client.join_call("room1").unwrap();
        client
            .send_signal(OutboundSignal {
                target_connection_id: "conn-9".to_string(),
                kind: SignalKind::Offer,
                payload: "v=0".to_string(),
            })
            .unwrap();
        client.send_chat("hi").unwrap();

        let received = relay.next_frames(3).await;
        assert_eq!(
            received,
            vec![
                ClientMessage::JoinCall {
                    call_id: "room1".to_string()
                },
                ClientMessage::Signal {
                    target_connection_id: "conn-9".to_string(),
                    kind: SignalKind::Offer,
                    payload: "v=0".to_string(),
                },
                ClientMessage::Chat {
                    body: "hi".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_events_end_when_relay_drops_the_channel() {
        let relay = TestRelay::start().await;
        let (client, mut events) = SignalingClient::connect(&ClientContext::new(relay.url(), "good-alice"))
            .await
            .unwrap();
        let _connected = events.recv().await;

        relay.drop_connections();
        assert!(events.recv().await.is_none());

        // The writer is torn down together with the reader.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!client.is_open());
        assert_eq!(client.ping(), Err(Error::NotConnected));
    }
}
