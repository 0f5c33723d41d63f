//! Signal and chat forwarding.
//!
//! Both relays are thin: they validate what the registry cannot (payload
//! shape for chat) and let the registry check membership and deliver under
//! its lock. Neither ever reads a signal payload.

use std::sync::Arc;

use chrono::Utc;

use huddle_core::protocol::{ChatMessage, SignalMessage};
use huddle_core::{Error, Result};

use crate::registry::SessionRegistry;

/// Default maximum chat body size in bytes.
pub const DEFAULT_MAX_CHAT_BYTES: usize = 4096;

// ── Signal Relay ──────────────────────────────────────────────────────────────

/// Forwards offers, answers and candidates to exactly one call member.
#[derive(Debug, Clone)]
pub struct SignalRelay {
    registry: Arc<SessionRegistry>,
}

impl SignalRelay {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to its target, verbatim.
    ///
    /// Errors are `NotInSession` or `TargetUnavailable`; both are expected
    /// races and the caller drops them.
    pub fn relay(&self, message: SignalMessage) -> Result<()> {
        let sender = message.sender_connection_id.clone();
        let target = message.target_connection_id.clone();
        let kind = message.kind;

        self.registry
            .deliver_to_member(&sender, &target, message.into_delivery())?;

        tracing::debug!(
            from = sender.as_str(),
            to = target.as_str(),
            kind = %kind,
            "Relayed signal"
        );
        Ok(())
    }
}

// ── Chat Relay ────────────────────────────────────────────────────────────────

/// Fans a chat message out to the rest of the sender's call.
#[derive(Debug, Clone)]
pub struct ChatRelay {
    registry: Arc<SessionRegistry>,
    max_body_bytes: usize,
}

impl ChatRelay {
    pub fn new(registry: Arc<SessionRegistry>, max_body_bytes: usize) -> Self {
        Self {
            registry,
            max_body_bytes,
        }
    }

    /// Relay `body` from `sender_id`. Returns the number of recipients.
    ///
    /// The body is trimmed; an empty body is dropped without error. Bodies
    /// over the size limit fail with `MessageTooLarge`.
    pub fn relay(&self, sender_id: &str, body: &str) -> Result<usize> {
        let body = body.trim();
        if body.is_empty() {
            tracing::debug!(from = sender_id, "Dropped empty chat message");
            return Ok(0);
        }
        if body.len() > self.max_body_bytes {
            return Err(Error::MessageTooLarge {
                size: body.len(),
                limit: self.max_body_bytes,
            });
        }

        let sent_at = Utc::now();
        let delivered = self.registry.deliver_to_others(sender_id, |call_id| {
            ChatMessage {
                sender_connection_id: sender_id.to_string(),
                call_id: call_id.clone(),
                body: body.to_string(),
                sent_at,
            }
            .to_delivery()
        })?;

        tracing::debug!(from = sender_id, recipients = delivered, "Relayed chat message");
        Ok(delivered)
    }
}
