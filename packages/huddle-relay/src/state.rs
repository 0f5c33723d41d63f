//! Server state management.
//!
//! Tracks connected clients and owns the call registry and the relays built
//! on it. The connection table is a DashMap of who is online; outbound queues
//! and membership live behind the registry's own lock.

use std::sync::Arc;

use dashmap::DashMap;

use huddle_core::{IdentityVerifier, PublicIdentity};

use crate::auth::{ConnectionAuthenticator, DEFAULT_COOKIE_NAME};
use crate::registry::{SessionRegistry, DEFAULT_MAX_CALL_PARTICIPANTS};
use crate::relay::{ChatRelay, SignalRelay, DEFAULT_MAX_CHAT_BYTES};

/// Default listen port.
const DEFAULT_PORT: u16 = 8080;

/// Default region label.
const DEFAULT_REGION: &str = "local";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Cookie the session credential is read from
    pub cookie_name: String,
    pub max_call_participants: usize,
    /// Chat bodies above this many bytes are rejected
    pub max_chat_bytes: usize,
    /// Human-readable region label (e.g. "us-east", "eu-west")
    pub region: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            max_call_participants: DEFAULT_MAX_CALL_PARTICIPANTS,
            max_chat_bytes: DEFAULT_MAX_CHAT_BYTES,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Connection id → identity for every open channel.
    pub connections: Arc<DashMap<String, PublicIdentity>>,

    /// Call membership.
    pub registry: Arc<SessionRegistry>,

    pub signals: SignalRelay,

    pub chat: ChatRelay,

    /// Handshake gate.
    pub authenticator: ConnectionAuthenticator,

    /// Server configuration.
    pub config: RelayConfig,
}

impl RelayState {
    /// Create a new relay state with the given configuration.
    pub fn new(config: RelayConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_call_participants));
        Self {
            connections: Arc::new(DashMap::new()),
            signals: SignalRelay::new(registry.clone()),
            chat: ChatRelay::new(registry.clone(), config.max_chat_bytes),
            authenticator: ConnectionAuthenticator::new(verifier, &config.cookie_name),
            registry,
            config,
        }
    }

    // ── Client Management ─────────────────────────────────────────────────

    /// Record an authenticated connection as online.
    pub fn register_client(&self, connection_id: &str, identity: &PublicIdentity) {
        tracing::info!(
            connection_id = connection_id,
            user_id = identity.id.as_str(),
            "Client registered"
        );
        self.connections
            .insert(connection_id.to_string(), identity.clone());
    }

    /// Forget a connection. Its call membership must already be gone.
    pub fn unregister_client(&self, connection_id: &str) {
        tracing::info!(connection_id = connection_id, "Client unregistered");
        self.connections.remove(connection_id);
    }

    /// Number of open connections.
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use huddle_core::{Error, Identity, Result};

    struct RejectAll;

    #[async_trait]
    impl IdentityVerifier for RejectAll {
        async fn verify(&self, _token: &str) -> Result<Identity> {
            Err(Error::Unauthenticated("test".into()))
        }
    }

    fn test_config() -> RelayConfig {
        RelayConfig {
            port: 0,
            cookie_name: "session".to_string(),
            max_call_participants: 3,
            max_chat_bytes: 64,
            region: "test".to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cookie_name, "jwt");
        assert_eq!(config.max_call_participants, 50);
        assert_eq!(config.max_chat_bytes, 4096);
        assert_eq!(config.region, "local");
    }

    #[test]
    fn test_config_flows_into_components() {
        let state = RelayState::new(test_config(), Arc::new(RejectAll));
        assert_eq!(state.registry.max_participants(), 3);
        assert_eq!(
            state.authenticator.sources()[0],
            crate::auth::CredentialSource::Cookie("session".to_string())
        );
    }

    #[test]
    fn test_register_and_unregister_client() {
        let state = RelayState::new(test_config(), Arc::new(RejectAll));
        let alice = PublicIdentity {
            id: "user-alice".into(),
            name: "Alice".into(),
        };

        state.register_client("conn-a", &alice);
        state.register_client("conn-b", &alice);
        assert_eq!(state.online_count(), 2);
        assert_eq!(state.connections.get("conn-a").unwrap().name, "Alice");

        state.unregister_client("conn-a");
        state.unregister_client("conn-a");
        assert_eq!(state.online_count(), 1);
        assert!(!state.connections.contains_key("conn-a"));
    }
}
