//! WebSocket connection handler.
//!
//! Manages individual WebSocket connections: parsing client messages,
//! routing them through the relay state, and sending responses.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use huddle_core::protocol::{ClientMessage, ServerMessage, SignalKind, SignalMessage};
use huddle_core::{Error, PublicIdentity};

use crate::auth::AuthenticatedConnection;
use crate::state::RelayState;

/// Per-connection context the message handlers need.
struct Connection {
    id: String,
    identity: PublicIdentity,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Handle a single authenticated WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Registers the connection and sends `connected`
/// 2. Spawns a sender task to forward outbound messages
/// 3. Processes incoming messages until the connection closes
/// 4. Leaves the current call before returning
pub async fn handle_websocket(socket: WebSocket, state: RelayState, auth: AuthenticatedConnection) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn = Connection {
        id: auth.connection_id,
        identity: auth.identity.public(),
        sender: tx,
    };

    // ── Step 1: Register Client ───────────────────────────────────────────

    state.register_client(&conn.id, &conn.identity);
    let _ = conn.sender.send(ServerMessage::Connected {
        connection_id: conn.id.clone(),
        identity: conn.identity.clone(),
    });
    tracing::info!(
        connection_id = conn.id.as_str(),
        user_id = conn.identity.id.as_str(),
        "WebSocket connected"
    );

    // ── Step 2: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Step 3: Process Messages ──────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(&state, &conn, client_msg);
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = conn.id.as_str(),
                        error = %e,
                        "Failed to parse client message"
                    );
                    send_error(&conn, format!("Invalid message format: {}", e));
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = conn.id.as_str(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = conn.id.as_str(),
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            _ => {} // axum answers pings itself
        }
    }

    // ── Step 4: Cleanup ───────────────────────────────────────────────────

    state.registry.leave(&conn.id);
    state.unregister_client(&conn.id);
    sender_task.abort();
    tracing::info!(connection_id = conn.id.as_str(), "WebSocket disconnected");
}

/// Handle a parsed client message.
fn handle_client_message(state: &RelayState, conn: &Connection, msg: ClientMessage) {
    match msg {
        ClientMessage::JoinCall { call_id } => {
            handle_join_call(state, conn, &call_id);
        }

        ClientMessage::LeaveCall => {
            handle_leave_call(state, conn);
        }

        ClientMessage::Signal {
            target_connection_id,
            kind,
            payload,
        } => {
            handle_signal(state, conn, target_connection_id, kind, payload);
        }

        ClientMessage::Chat { body } => {
            handle_chat(state, conn, &body);
        }

        ClientMessage::Ping => {
            let _ = conn.sender.send(ServerMessage::Pong);
        }
    }
}

fn send_error(conn: &Connection, message: String) {
    let _ = conn.sender.send(ServerMessage::Error { message });
}

// ── Call Handlers ─────────────────────────────────────────────────────────────

/// Join (or switch to) a call. The registry sends `call_joined` and the
/// `peer_joined` notifications. Call ids are opaque and used exactly as sent.
fn handle_join_call(state: &RelayState, conn: &Connection, call_id: &str) {
    if call_id.trim().is_empty() {
        send_error(conn, "Call id must not be empty".to_string());
        return;
    }

    if let Err(e) = state
        .registry
        .join(&conn.id, &conn.identity, &conn.sender, call_id)
    {
        send_error(conn, e.to_string());
    }
}

/// Leave the current call, if any, and acknowledge.
fn handle_leave_call(state: &RelayState, conn: &Connection) {
    if let Some(call_id) = state.registry.leave(&conn.id) {
        let _ = conn.sender.send(ServerMessage::CallLeft { call_id });
    }
}

// ── Relay Handlers ────────────────────────────────────────────────────────────

/// Forward a negotiation payload to one member of the sender's call.
fn handle_signal(
    state: &RelayState,
    conn: &Connection,
    target_connection_id: String,
    kind: SignalKind,
    payload: String,
) {
    let message = SignalMessage {
        kind,
        sender_connection_id: conn.id.clone(),
        target_connection_id,
        payload,
    };

    if let Err(e) = state.signals.relay(message) {
        log_drop(conn, "signal", &e);
    }
}

/// Send a chat message to the rest of the sender's call.
fn handle_chat(state: &RelayState, conn: &Connection, body: &str) {
    match state.chat.relay(&conn.id, body) {
        Ok(_) => {}
        Err(e) if e.is_relay_drop() => log_drop(conn, "chat", &e),
        Err(e) => send_error(conn, e.to_string()),
    }
}

/// Membership races are expected and never reported to the sender.
fn log_drop(conn: &Connection, what: &str, error: &Error) {
    tracing::debug!(
        connection_id = conn.id.as_str(),
        what = what,
        error = %error,
        "Dropped message"
    );
}
