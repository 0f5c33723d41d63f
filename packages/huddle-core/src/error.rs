//! # Error Handling
//!
//! One error type shared by the relay and the client library.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Auth Errors (100-199)                                             │
//! │  │   └── Unauthenticated       - Missing/invalid/expired credential    │
//! │  │                                                                      │
//! │  ├── Session Errors (200-299)                                          │
//! │  │   ├── NotInSession          - Signal/chat with no current call      │
//! │  │   ├── TargetUnavailable     - Target not in the sender's call       │
//! │  │   ├── CallFull              - Call reached its participant cap      │
//! │  │   └── MessageTooLarge       - Chat body over the configured limit   │
//! │  │                                                                      │
//! │  ├── Media Errors (300-399)                                            │
//! │  │   ├── CapabilityDenied      - Permission refused / no device        │
//! │  │   └── Negotiation           - Peer connection rejected a signal     │
//! │  │                                                                      │
//! │  └── Transport Errors (400-499)                                        │
//! │      ├── NotConnected          - No signaling channel                  │
//! │      ├── ConnectionFailed      - Channel could not be established      │
//! │      ├── Timeout               - Operation timed out                   │
//! │      └── Protocol              - Unexpected frame on the channel       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `NotInSession` and `TargetUnavailable` are produced by the relays and are
//! expected races. Callers log them and move on; they are never sent back to
//! the connection that caused them.

use thiserror::Error;

/// Result type alias for Huddle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Huddle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Auth Errors (100-199)
    // ========================================================================

    /// The handshake carried no usable credential, or the credential was
    /// rejected by the identity verifier.
    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    // ========================================================================
    // Session Errors (200-299)
    // ========================================================================

    /// The connection is not a member of any call.
    #[error("Connection is not in a call.")]
    NotInSession,

    /// The addressed connection is not a member of the sender's call.
    #[error("Target '{0}' is not in this call.")]
    TargetUnavailable(String),

    /// The call reached its participant limit.
    #[error("Call '{0}' is full.")]
    CallFull(String),

    /// A chat body exceeded the configured size limit.
    #[error("Message too large: {size} bytes (limit {limit}).")]
    MessageTooLarge {
        /// Size of the rejected body
        size: usize,
        /// Configured limit
        limit: usize,
    },

    // ========================================================================
    // Media Errors (300-399)
    // ========================================================================

    /// Local media permission was refused or no capture device exists.
    #[error("Media capability denied: {0}")]
    CapabilityDenied(String),

    /// The negotiated connection rejected a signaling payload.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    // ========================================================================
    // Transport Errors (400-499)
    // ========================================================================

    /// No signaling channel is open.
    #[error("Not connected to the relay.")]
    NotConnected,

    /// The signaling channel could not be established.
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The peer sent a frame that does not fit the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Authentication
    /// - 200-299: Session membership and relaying
    /// - 300-399: Media and negotiation
    /// - 400-499: Transport
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::Unauthenticated(_) => 100,

            Error::NotInSession => 200,
            Error::TargetUnavailable(_) => 201,
            Error::CallFull(_) => 202,
            Error::MessageTooLarge { .. } => 203,

            Error::CapabilityDenied(_) => 300,
            Error::Negotiation(_) => 301,

            Error::NotConnected => 400,
            Error::ConnectionFailed(_) => 401,
            Error::Timeout(_) => 402,
            Error::Protocol(_) => 403,

            Error::Serialization(_) => 900,
        }
    }

    /// Check if this error is recoverable by retrying the transport.
    ///
    /// Authentication failures are not: the caller has to obtain a new
    /// credential first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::NotConnected
        )
    }

    /// Whether this is an expected membership race that is dropped silently.
    pub fn is_relay_drop(&self) -> bool {
        matches!(self, Error::NotInSession | Error::TargetUnavailable(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
