//! Relay protocol message definitions.
//!
//! The relay speaks a simple JSON-over-WebSocket protocol. Negotiation
//! payloads (SDP offers/answers, ICE candidates) are opaque strings: the relay
//! never parses them and forwards them byte-for-byte.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::PublicIdentity;

/// Server-assigned identifier of one physical channel.
pub type ConnectionId = String;

/// Opaque call/room name.
pub type CallId = String;

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Messages sent from a client to the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or switch to) a call. The call is created on first join.
    JoinCall {
        call_id: CallId,
    },

    /// Leave the current call.
    LeaveCall,

    /// Forward a negotiation payload to one member of the sender's call.
    Signal {
        target_connection_id: ConnectionId,
        kind: SignalKind,
        payload: String,
    },

    /// Send a chat message to every other member of the sender's call.
    Chat {
        body: String,
    },

    /// Ping to keep connection alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Messages sent from the relay server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every accepted channel.
    Connected {
        connection_id: ConnectionId,
        identity: PublicIdentity,
    },

    /// The joiner's initial world-view: everyone already in the call.
    CallJoined {
        call_id: CallId,
        members: Vec<MemberInfo>,
    },

    /// Acknowledges an explicit leave.
    CallLeft {
        call_id: CallId,
    },

    /// Someone joined the call this connection is in.
    PeerJoined {
        peer_connection_id: ConnectionId,
        identity: PublicIdentity,
    },

    /// Someone left the call this connection is in.
    PeerLeft {
        peer_connection_id: ConnectionId,
    },

    /// A negotiation payload forwarded from another member.
    Signal {
        sender_connection_id: ConnectionId,
        kind: SignalKind,
        payload: String,
    },

    /// A chat message from another member.
    Chat {
        sender_connection_id: ConnectionId,
        call_id: CallId,
        body: String,
        sent_at: DateTime<Utc>,
    },

    /// Pong response to keep connection alive.
    Pong,

    /// Error response.
    Error {
        message: String,
    },
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// The three negotiation message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        };
        f.write_str(name)
    }
}

/// One call member as seen by other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub connection_id: ConnectionId,
    pub identity: PublicIdentity,
}

/// An addressed negotiation message, as routed by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub kind: SignalKind,
    pub sender_connection_id: ConnectionId,
    pub target_connection_id: ConnectionId,
    pub payload: String,
}

impl SignalMessage {
    /// The frame delivered to the target.
    pub fn into_delivery(self) -> ServerMessage {
        ServerMessage::Signal {
            sender_connection_id: self.sender_connection_id,
            kind: self.kind,
            payload: self.payload,
        }
    }
}

/// A chat message, as routed by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender_connection_id: ConnectionId,
    pub call_id: CallId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The frame delivered to each recipient.
    pub fn to_delivery(&self) -> ServerMessage {
        ServerMessage::Chat {
            sender_connection_id: self.sender_connection_id.clone(),
            call_id: self.call_id.clone(),
            body: self.body.clone(),
            sent_at: self.sent_at,
        }
    }
}
