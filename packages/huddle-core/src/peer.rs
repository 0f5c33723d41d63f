//! # Peer Store
//!
//! Client-side mirror of call membership. One `PeerStore` per endpoint owns a
//! [`PeerRecord`] for every remote participant, created and destroyed in
//! lockstep with the relay's membership events.
//!
//! ```text
//!   relay frame                      store reaction
//!   ───────────────────────────      ─────────────────────────────────────
//!   connected                        reset: drop every record, new local id
//!   call_joined { members }          record per member, role = answerer
//!   peer_joined { peer }             record for peer, role = offerer, offer
//!   signal { sender, kind, payload } route to record (create if unknown)
//!   peer_left { peer }               close + drop record, synchronously
//!   call_left                        drop every record
//! ```
//!
//! Glare is avoided with a fixed tie-break: the member already in the call
//! always offers to the newcomer.
//!
//! The negotiated connection itself lives behind [`PeerConnector`]; signals it
//! produces go out through the [`OutboundSignal`] channel handed to the store.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::media::{
    LocalMedia, MediaCapabilityProvider, MediaConstraints, MediaKind, MediaStream, MediaTrack,
};
use crate::protocol::{ChatMessage, ConnectionId, MemberInfo, ServerMessage, SignalKind};
use crate::identity::PublicIdentity;

// ============================================================================
// NEGOTIATION STATE
// ============================================================================

/// Which side of the offer/answer exchange this endpoint plays for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// We were already in the call; we send the offer.
    Offerer,
    /// We are the newcomer (or the peer's signal arrived first); we answer.
    Answerer,
}

/// Signaling state of one peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// Record exists, nothing exchanged yet
    #[default]
    New,
    /// We sent an offer and wait for the answer
    HaveLocalOffer,
    /// Offer/answer completed; candidates may still trickle
    Stable,
    /// The connector rejected a signal
    Failed(String),
}

/// A signal produced by a negotiated connection, to be sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    pub target_connection_id: ConnectionId,
    pub kind: SignalKind,
    pub payload: String,
}

/// Sender side of the outbound signal queue.
pub type SignalSender = mpsc::UnboundedSender<OutboundSignal>;

// ============================================================================
// CONNECTOR CONTRACT
// ============================================================================

/// Everything a connector needs to build a connection to one peer.
#[derive(Debug, Clone)]
pub struct PeerContext {
    pub peer_connection_id: ConnectionId,
    pub role: NegotiationRole,
    pub local_media: LocalMedia,
    pub signals: SignalSender,
}

/// Builds negotiated connections (an `RTCPeerConnection` in a browser, a
/// `webrtc` peer connection natively).
pub trait PeerConnector: Send {
    /// Create the connection for one peer.
    fn connect(&mut self, peer: PeerContext) -> Result<Box<dyn PeerConnection>>;
}

/// One negotiated connection.
pub trait PeerConnection: Send {
    /// Produce an offer and queue it on the signal channel.
    fn create_offer(&mut self) -> Result<()>;

    /// Apply an opaque signal received from the peer. Applying an offer is
    /// expected to queue the answer.
    fn apply_signal(&mut self, kind: SignalKind, payload: &str) -> Result<()>;

    /// Release the connection and its media. Called exactly once.
    fn close(&mut self);
}

// ============================================================================
// PEER RECORD
// ============================================================================

/// Local bookkeeping for one remote participant.
pub struct PeerRecord {
    peer_connection_id: ConnectionId,
    identity: Option<PublicIdentity>,
    role: NegotiationRole,
    state: NegotiationState,
    remote_stream: MediaStream,
    local_stream: LocalMedia,
    connection: Box<dyn PeerConnection>,
}

impl PeerRecord {
    pub fn peer_connection_id(&self) -> &str {
        &self.peer_connection_id
    }

    /// Known once the relay announced the peer; `None` for records created
    /// from an early signal.
    pub fn identity(&self) -> Option<&PublicIdentity> {
        self.identity.as_ref()
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn remote_stream(&self) -> &MediaStream {
        &self.remote_stream
    }

    pub fn local_stream(&self) -> &LocalMedia {
        &self.local_stream
    }

    fn destroy(mut self) {
        self.connection.close();
        self.remote_stream.release();
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// What changed after the store applied a relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The channel (re)connected under a new connection id.
    Connected { connection_id: ConnectionId },
    /// We joined a call; `peers` are the members already present.
    CallJoined { call_id: String, peers: Vec<ConnectionId> },
    /// We left the call; every record was dropped.
    CallLeft { call_id: String },
    /// A record was created.
    PeerAdded { peer_connection_id: ConnectionId },
    /// A record was destroyed.
    PeerRemoved { peer_connection_id: ConnectionId },
    /// Chat from another member, passed through unchanged.
    Chat(ChatMessage),
    /// The relay reported a protocol error for one of our frames.
    RelayError(String),
}

/// Result of [`PeerStore::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The track was flipped; carries the new state.
    Toggled { enabled: bool },
    /// The peer exists but has no track of that kind.
    NoSuchTrack,
    /// No local or remote peer with that id.
    NoSuchPeer,
}

// ============================================================================
// LOCAL BOOTSTRAP
// ============================================================================

/// Acquire local media for a call.
///
/// Denial or missing devices never fail the join: the endpoint continues with
/// an empty stream. Captured tracks start disabled; the user turns each on.
pub async fn bootstrap_local_media(
    provider: &dyn MediaCapabilityProvider,
    constraints: MediaConstraints,
) -> LocalMedia {
    let tracks: Vec<MediaTrack> = match provider.acquire(constraints).await {
        Ok(tracks) => tracks,
        Err(Error::CapabilityDenied(reason)) => {
            tracing::warn!(reason = reason.as_str(), "Camera and mic permission denied, joining without media");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Local media unavailable, joining without media");
            Vec::new()
        }
    };

    let mut stream = MediaStream::from_tracks(tracks);
    stream.disable_all();
    LocalMedia::new(stream)
}

// ============================================================================
// PEER STORE
// ============================================================================

/// Owns the local endpoint's media and one record per remote peer.
pub struct PeerStore {
    local_connection_id: Option<ConnectionId>,
    local_media: LocalMedia,
    peers: HashMap<ConnectionId, PeerRecord>,
    connector: Box<dyn PeerConnector>,
    signals: SignalSender,
}

impl PeerStore {
    /// Create a store. Signals produced by connections are queued on `signals`.
    pub fn new(
        local_media: LocalMedia,
        connector: Box<dyn PeerConnector>,
        signals: SignalSender,
    ) -> Self {
        Self {
            local_connection_id: None,
            local_media,
            peers: HashMap::new(),
            connector,
            signals,
        }
    }

    pub fn local_connection_id(&self) -> Option<&str> {
        self.local_connection_id.as_deref()
    }

    pub fn local_media(&self) -> &LocalMedia {
        &self.local_media
    }

    pub fn peer(&self, peer_connection_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_connection_id)
    }

    pub fn contains(&self, peer_connection_id: &str) -> bool {
        self.peers.contains_key(peer_connection_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<ConnectionId> {
        self.peers.keys().cloned().collect()
    }

    /// Apply one relay frame and report what changed.
    pub fn apply(&mut self, message: ServerMessage) -> Vec<PeerEvent> {
        match message {
            ServerMessage::Connected { connection_id, .. } => {
                self.reset(connection_id.clone());
                vec![PeerEvent::Connected { connection_id }]
            }

            ServerMessage::CallJoined { call_id, members } => {
                let mut events = self.on_call_joined(&members);
                events.insert(
                    0,
                    PeerEvent::CallJoined {
                        call_id,
                        peers: members.into_iter().map(|m| m.connection_id).collect(),
                    },
                );
                events
            }

            ServerMessage::CallLeft { call_id } => {
                let mut events: Vec<PeerEvent> = self
                    .clear()
                    .into_iter()
                    .map(|peer_connection_id| PeerEvent::PeerRemoved { peer_connection_id })
                    .collect();
                events.push(PeerEvent::CallLeft { call_id });
                events
            }

            ServerMessage::PeerJoined {
                peer_connection_id,
                identity,
            } => self
                .on_peer_joined(&peer_connection_id, identity)
                .into_iter()
                .collect(),

            ServerMessage::PeerLeft { peer_connection_id } => {
                if self.on_peer_left(&peer_connection_id) {
                    vec![PeerEvent::PeerRemoved { peer_connection_id }]
                } else {
                    Vec::new()
                }
            }

            ServerMessage::Signal {
                sender_connection_id,
                kind,
                payload,
            } => self
                .on_signal(&sender_connection_id, kind, &payload)
                .into_iter()
                .collect(),

            ServerMessage::Chat {
                sender_connection_id,
                call_id,
                body,
                sent_at,
            } => vec![PeerEvent::Chat(ChatMessage {
                sender_connection_id,
                call_id,
                body,
                sent_at,
            })],

            ServerMessage::Error { message } => vec![PeerEvent::RelayError(message)],

            ServerMessage::Pong => Vec::new(),
        }
    }

    /// Our join was acknowledged: everyone already present will offer to us.
    pub fn on_call_joined(&mut self, members: &[MemberInfo]) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        for member in members {
            if self.is_local(&member.connection_id) {
                continue;
            }
            if let Some(existing) = self.peers.get_mut(&member.connection_id) {
                existing.identity = Some(member.identity.clone());
                continue;
            }
            if self.create_record(
                &member.connection_id,
                Some(member.identity.clone()),
                NegotiationRole::Answerer,
            ) {
                events.push(PeerEvent::PeerAdded {
                    peer_connection_id: member.connection_id.clone(),
                });
            }
        }
        events
    }

    /// A newcomer joined our call: create its record and send the offer.
    pub fn on_peer_joined(
        &mut self,
        peer_connection_id: &str,
        identity: PublicIdentity,
    ) -> Option<PeerEvent> {
        if self.is_local(peer_connection_id) {
            return None;
        }

        if let Some(existing) = self.peers.get_mut(peer_connection_id) {
            // Their signal raced ahead of the announcement; keep negotiating.
            existing.identity = Some(identity);
            return None;
        }

        if !self.create_record(peer_connection_id, Some(identity), NegotiationRole::Offerer) {
            return None;
        }

        if let Some(record) = self.peers.get_mut(peer_connection_id) {
            match record.connection.create_offer() {
                Ok(()) => record.state = NegotiationState::HaveLocalOffer,
                Err(e) => {
                    tracing::warn!(peer = peer_connection_id, error = %e, "Failed to create offer");
                    record.state = NegotiationState::Failed(e.to_string());
                }
            }
        }

        Some(PeerEvent::PeerAdded {
            peer_connection_id: peer_connection_id.to_string(),
        })
    }

    /// Destroy the record for a departed peer. Returns whether one existed.
    pub fn on_peer_left(&mut self, peer_connection_id: &str) -> bool {
        match self.peers.remove(peer_connection_id) {
            Some(record) => {
                record.destroy();
                tracing::debug!(peer = peer_connection_id, "Peer record destroyed");
                true
            }
            None => false,
        }
    }

    /// Route a signal to its record, creating the record if the signal
    /// arrived before the peer was announced.
    pub fn on_signal(
        &mut self,
        sender_connection_id: &str,
        kind: SignalKind,
        payload: &str,
    ) -> Option<PeerEvent> {
        if self.is_local(sender_connection_id) {
            return None;
        }

        let mut event = None;
        if !self.peers.contains_key(sender_connection_id) {
            if !self.create_record(sender_connection_id, None, NegotiationRole::Answerer) {
                return None;
            }
            event = Some(PeerEvent::PeerAdded {
                peer_connection_id: sender_connection_id.to_string(),
            });
        }

        let record = self.peers.get_mut(sender_connection_id)?;
        match record.connection.apply_signal(kind, payload) {
            Ok(()) => match kind {
                SignalKind::Offer | SignalKind::Answer => record.state = NegotiationState::Stable,
                SignalKind::Candidate => {}
            },
            Err(e) => {
                tracing::warn!(
                    peer = sender_connection_id,
                    kind = %kind,
                    error = %e,
                    "Peer connection rejected signal"
                );
                record.state = NegotiationState::Failed(e.to_string());
            }
        }

        event
    }

    /// Attach a track received from a peer to its remote stream.
    pub fn add_remote_track(&mut self, peer_connection_id: &str, track: MediaTrack) -> bool {
        match self.peers.get_mut(peer_connection_id) {
            Some(record) => {
                record.remote_stream.add_track(track);
                true
            }
            None => false,
        }
    }

    /// Flip the `kind` track of a peer. For the local connection id this is
    /// the captured local track; for a remote peer, its received track.
    pub fn toggle(&mut self, peer_connection_id: &str, kind: MediaKind) -> ToggleOutcome {
        let flipped = if self.is_local(peer_connection_id) {
            self.local_media.toggle(kind)
        } else if let Some(record) = self.peers.get_mut(peer_connection_id) {
            record.remote_stream.toggle(kind)
        } else {
            tracing::debug!(peer = peer_connection_id, "Toggle for unknown peer");
            return ToggleOutcome::NoSuchPeer;
        };

        match flipped {
            Some(enabled) => ToggleOutcome::Toggled { enabled },
            None => {
                tracing::debug!(peer = peer_connection_id, kind = %kind, "No track to toggle");
                ToggleOutcome::NoSuchTrack
            }
        }
    }

    /// Destroy every record. Returns the ids that were dropped.
    pub fn clear(&mut self) -> Vec<ConnectionId> {
        let ids: Vec<ConnectionId> = self.peers.keys().cloned().collect();
        for (_, record) in self.peers.drain() {
            record.destroy();
        }
        ids
    }

    /// New channel, new identity on the relay: nothing from before survives.
    pub fn reset(&mut self, local_connection_id: ConnectionId) {
        let dropped = self.clear();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Dropped peer records on reconnect");
        }
        self.local_connection_id = Some(local_connection_id);
    }

    fn is_local(&self, connection_id: &str) -> bool {
        self.local_connection_id.as_deref() == Some(connection_id)
    }

    fn create_record(
        &mut self,
        peer_connection_id: &str,
        identity: Option<PublicIdentity>,
        role: NegotiationRole,
    ) -> bool {
        let context = PeerContext {
            peer_connection_id: peer_connection_id.to_string(),
            role,
            local_media: self.local_media.clone(),
            signals: self.signals.clone(),
        };

        let connection = match self.connector.connect(context) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(peer = peer_connection_id, error = %e, "Failed to create peer connection");
                return false;
            }
        };

        self.peers.insert(
            peer_connection_id.to_string(),
            PeerRecord {
                peer_connection_id: peer_connection_id.to_string(),
                identity,
                role,
                state: NegotiationState::New,
                remote_stream: MediaStream::empty(),
                local_stream: self.local_media.clone(),
                connection,
            },
        );
        true
    }
}

impl Drop for PeerStore {
    fn drop(&mut self) {
        self.clear();
    }
}
