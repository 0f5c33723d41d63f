//! Minimal in-process relay for client tests.
//!
//! Accepts credentials of the form `good-<name>`, answers with a `connected`
//! frame (`conn-1`, `conn-2`, ...) and records every client frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::identity::PublicIdentity;
use crate::protocol::{ClientMessage, ServerMessage};

pub(crate) struct TestRelay {
    addr: SocketAddr,
    handshakes: Arc<AtomicUsize>,
    tokens: Arc<Mutex<Vec<String>>>,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientMessage>>,
    kill: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

fn credential_from(req: &Request) -> Option<String> {
    if let Some(cookie) = req.headers().get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        if let Some(token) = cookie.strip_prefix("jwt=") {
            return Some(token.to_string());
        }
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

impl TestRelay {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (kill, _) = broadcast::channel(4);

        let accept_task = {
            let handshakes = handshakes.clone();
            let tokens = tokens.clone();
            let kill = kill.clone();
            tokio::spawn(async move {
                let accepted = Arc::new(AtomicUsize::new(0));
                while let Ok((stream, _)) = listener.accept().await {
                    let handshakes = handshakes.clone();
                    let tokens = tokens.clone();
                    let accepted = accepted.clone();
                    let frames_tx = frames_tx.clone();
                    let mut kill_rx = kill.subscribe();

                    tokio::spawn(async move {
                        let presented = Arc::new(Mutex::new(None::<String>));
                        let captured = presented.clone();
                        let callback = move |req: &Request, resp: Response| {
                            handshakes.fetch_add(1, Ordering::SeqCst);
                            match credential_from(req) {
                                Some(token) if token.starts_with("good-") => {
                                    *captured.lock() = Some(token);
                                    Ok(resp)
                                }
                                _ => {
                                    let mut reject =
                                        ErrorResponse::new(Some("Authentication error".to_string()));
                                    *reject.status_mut() = StatusCode::UNAUTHORIZED;
                                    Err(reject)
                                }
                            }
                        };

                        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                        else {
                            return;
                        };
                        let token = presented.lock().clone().unwrap_or_default();
                        tokens.lock().push(token.clone());
                        let n = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                        let name = token.trim_start_matches("good-").to_string();

                        let connected = ServerMessage::Connected {
                            connection_id: format!("conn-{}", n),
                            identity: PublicIdentity {
                                id: format!("user-{}", name),
                                name,
                            },
                        };
                        let json = serde_json::to_string(&connected).unwrap();
                        if ws.send(WsMessage::Text(json.into())).await.is_err() {
                            return;
                        }

                        loop {
                            tokio::select! {
                                _ = kill_rx.recv() => break,
                                frame = ws.next() => match frame {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Ok(msg) = serde_json::from_str::<ClientMessage>(&text) {
                                            let _ = frames_tx.send(msg);
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                },
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            handshakes,
            tokens,
            frames: tokio::sync::Mutex::new(frames_rx),
            kill,
            accept_task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Upgrade attempts seen, accepted or not.
    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Credentials of accepted connections, in accept order.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    pub(crate) async fn next_frames(&self, n: usize) -> Vec<ClientMessage> {
        let mut frames = self.frames.lock().await;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match frames.recv().await {
                Some(frame) => out.push(frame),
                None => break,
            }
        }
        out
    }

    /// Drop every open socket without a close handshake.
    pub(crate) fn drop_connections(&self) {
        let _ = self.kill.send(());
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.kill.send(());
    }
}
