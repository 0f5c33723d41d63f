//! # Huddle Core
//!
//! Shared building blocks for Huddle group calls: the relay wire protocol,
//! identity contracts, the error taxonomy, and the client side of a call.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          HUDDLE CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Identity   │  │  Protocol   │  │    Media    │  │    Error     │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Identity  │  │ - Client →  │  │ - Tracks    │  │ - Taxonomy   │   │
//! │  │ - Verifier  │  │ - → Client  │  │ - Provider  │  │ - Codes      │   │
//! │  │ - Issuer    │  │ - Signals   │  │ - Toggles   │  │              │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────────────┘   │
//! │         │                │                │                            │
//! │         └────────────────┼────────────────┘                            │
//! │                          │                                              │
//! │  ┌───────────────────────┴───────┐  ┌─────────────────────────────────┐│
//! │  │           Client              │  │           Peer Store            ││
//! │  │                               │  │                                 ││
//! │  │ - WebSocket channel           │─►│ - One record per remote peer   ││
//! │  │ - ReconnectCoordinator        │  │ - Offer/answer roles           ││
//! │  │ - Backoff, re-auth            │  │ - Local media bootstrap        ││
//! │  └───────────────────────────────┘  └─────────────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types shared by relay and client
//! - [`identity`] - Verified identities and the account-service contracts
//! - [`protocol`] - JSON frames exchanged with the relay
//! - [`media`] - Media tracks and the capture capability contract
//! - [`peer`] - Client-side mirror of call membership
//! - [`client`] - Signaling channel and reconnect handling
//!
//! ## Typical client loop
//!
//! ```text
//!   coordinator.connect(&mut store) ──► events
//!   client.join_call("room1")
//!   loop {
//!       select {
//!           event  = events.recv()  => store.apply(event)   (None ⇒ recover)
//!           signal = signals.recv() => client.send_signal(signal)
//!       }
//!   }
//! ```

pub mod client;
pub mod error;
pub mod identity;
pub mod media;
pub mod peer;
pub mod protocol;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use client::{ClientContext, CredentialPlacement, ReconnectCoordinator, ReconnectPolicy, SignalingClient};
pub use error::{Error, Result};
pub use identity::{CredentialIssuer, Identity, IdentityVerifier, PublicIdentity};
pub use media::{LocalMedia, MediaCapabilityProvider, MediaConstraints, MediaKind, MediaTrack};
pub use peer::{PeerConnection, PeerConnector, PeerEvent, PeerStore, ToggleOutcome};
pub use protocol::{CallId, ClientMessage, ConnectionId, ServerMessage, SignalKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
