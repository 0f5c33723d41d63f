//! Call membership.
//!
//! The registry is the only owner of "who is in which call". Everything sits
//! behind one lock: join/leave transitions, the notifications they produce and
//! relay deliveries that depend on membership. Because notifications are
//! queued while the lock is held, every member sees membership events in the
//! same order the registry applied them, and nothing is delivered to a
//! connection after its leave has been applied.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use huddle_core::protocol::{CallId, ConnectionId, MemberInfo, ServerMessage};
use huddle_core::{Error, PublicIdentity, Result};

/// Default maximum participants per call.
pub const DEFAULT_MAX_CALL_PARTICIPANTS: usize = 50;

/// A connected client's outbound queue.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// One call member.
#[derive(Debug, Clone)]
struct Member {
    connection_id: ConnectionId,
    identity: PublicIdentity,
    sender: ClientSender,
}

impl Member {
    fn info(&self) -> MemberInfo {
        MemberInfo {
            connection_id: self.connection_id.clone(),
            identity: self.identity.clone(),
        }
    }

    fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// A live call. Members are kept in join order.
#[derive(Debug, Default)]
struct Session {
    members: Vec<Member>,
}

impl Session {
    fn member(&self, connection_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.connection_id == connection_id)
    }

    fn others(&self, connection_id: &str) -> impl Iterator<Item = &Member> {
        let connection_id = connection_id.to_string();
        self.members
            .iter()
            .filter(move |m| m.connection_id != connection_id)
    }
}

#[derive(Debug, Default)]
struct Table {
    sessions: HashMap<CallId, Session>,
    membership: HashMap<ConnectionId, CallId>,
}

impl Table {
    /// Remove `connection_id` from its session and notify the rest.
    /// Returns the call it was in.
    fn remove(&mut self, connection_id: &str) -> Option<CallId> {
        let call_id = self.membership.remove(connection_id)?;

        let now_empty = match self.sessions.get_mut(&call_id) {
            Some(session) => {
                session.members.retain(|m| m.connection_id != connection_id);
                for member in &session.members {
                    member.send(ServerMessage::PeerLeft {
                        peer_connection_id: connection_id.to_string(),
                    });
                }
                session.members.is_empty()
            }
            None => false,
        };

        tracing::info!(
            call_id = call_id.as_str(),
            connection_id = connection_id,
            "Participant left call"
        );

        if now_empty {
            self.sessions.remove(&call_id);
            tracing::debug!(call_id = call_id.as_str(), "Removed empty call");
        }

        Some(call_id)
    }
}

/// Authoritative call membership table.
#[derive(Debug)]
pub struct SessionRegistry {
    table: Mutex<Table>,
    max_participants: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_PARTICIPANTS)
    }
}

impl SessionRegistry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            max_participants,
        }
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    // ── Membership ────────────────────────────────────────────────────────

    /// Put `connection_id` into `call_id`.
    ///
    /// A connection is in at most one call: joining another call leaves the
    /// current one first (its members get `peer_left`, the joiner gets
    /// `call_left`). Existing members of the target get `peer_joined`; the
    /// joiner gets `call_joined` with everyone else already there. The same
    /// list is returned.
    ///
    /// Joining the call one is already in changes nothing and notifies no one;
    /// the joiner still gets the current list.
    ///
    /// Fails with `CallFull` when the target is at capacity; the connection
    /// then stays where it was.
    pub fn join(
        &self,
        connection_id: &str,
        identity: &PublicIdentity,
        sender: &ClientSender,
        call_id: &str,
    ) -> Result<Vec<MemberInfo>> {
        let mut table = self.table.lock();

        if table.membership.get(connection_id).map(String::as_str) == Some(call_id) {
            let members: Vec<MemberInfo> = table
                .sessions
                .get(call_id)
                .map(|s| s.others(connection_id).map(Member::info).collect())
                .unwrap_or_default();
            let _ = sender.send(ServerMessage::CallJoined {
                call_id: call_id.to_string(),
                members: members.clone(),
            });
            return Ok(members);
        }

        let occupancy = table.sessions.get(call_id).map_or(0, |s| s.members.len());
        if occupancy >= self.max_participants {
            tracing::warn!(call_id = call_id, connection_id = connection_id, "Call full");
            return Err(Error::CallFull(call_id.to_string()));
        }

        if let Some(previous) = table.remove(connection_id) {
            let _ = sender.send(ServerMessage::CallLeft { call_id: previous });
        }

        let session = table.sessions.entry(call_id.to_string()).or_default();
        let existing: Vec<MemberInfo> = session.members.iter().map(Member::info).collect();

        for member in &session.members {
            member.send(ServerMessage::PeerJoined {
                peer_connection_id: connection_id.to_string(),
                identity: identity.clone(),
            });
        }
        session.members.push(Member {
            connection_id: connection_id.to_string(),
            identity: identity.clone(),
            sender: sender.clone(),
        });
        let participant_count = session.members.len();

        table
            .membership
            .insert(connection_id.to_string(), call_id.to_string());

        let _ = sender.send(ServerMessage::CallJoined {
            call_id: call_id.to_string(),
            members: existing.clone(),
        });

        tracing::info!(
            call_id = call_id,
            connection_id = connection_id,
            participant_count = participant_count,
            "Participant joined call"
        );

        Ok(existing)
    }

    /// Take `connection_id` out of its call, notifying the remaining members.
    /// A no-op for a connection that is in no call.
    pub fn leave(&self, connection_id: &str) -> Option<CallId> {
        self.table.lock().remove(connection_id)
    }

    /// Current members of `call_id`, in join order.
    pub fn members_of(&self, call_id: &str) -> Vec<MemberInfo> {
        self.table
            .lock()
            .sessions
            .get(call_id)
            .map(|s| s.members.iter().map(Member::info).collect())
            .unwrap_or_default()
    }

    /// The call `connection_id` is in.
    pub fn call_of(&self, connection_id: &str) -> Option<CallId> {
        self.table.lock().membership.get(connection_id).cloned()
    }

    // ── Delivery ──────────────────────────────────────────────────────────

    /// Deliver `message` to `target_id` if it shares a call with `sender_id`.
    ///
    /// `NotInSession` when the sender is in no call, `TargetUnavailable` when
    /// the target is not in the sender's call (or is the sender).
    pub fn deliver_to_member(
        &self,
        sender_id: &str,
        target_id: &str,
        message: ServerMessage,
    ) -> Result<()> {
        let table = self.table.lock();
        let call_id = table.membership.get(sender_id).ok_or(Error::NotInSession)?;

        let target = table
            .sessions
            .get(call_id)
            .and_then(|s| s.member(target_id))
            .filter(|m| m.connection_id != sender_id)
            .ok_or_else(|| Error::TargetUnavailable(target_id.to_string()))?;

        target.send(message);
        Ok(())
    }

    /// Deliver a message built for the sender's call to every other member.
    /// Returns how many members it was queued for.
    pub fn deliver_to_others<F>(&self, sender_id: &str, build: F) -> Result<usize>
    where
        F: FnOnce(&CallId) -> ServerMessage,
    {
        let table = self.table.lock();
        let call_id = table.membership.get(sender_id).ok_or(Error::NotInSession)?;
        let message = build(call_id);

        let delivered = table
            .sessions
            .get(call_id)
            .map(|s| {
                s.others(sender_id)
                    .filter(|m| m.send(message.clone()))
                    .count()
            })
            .unwrap_or(0);

        Ok(delivered)
    }

    // ── Stats ─────────────────────────────────────────────────────────────

    /// Number of live calls.
    pub fn active_calls(&self) -> usize {
        self.table.lock().sessions.len()
    }

    /// Number of connections in any call.
    pub fn participant_count(&self) -> usize {
        self.table.lock().membership.len()
    }
}
