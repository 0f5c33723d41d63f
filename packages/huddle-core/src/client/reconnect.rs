//! Channel lifecycle across credential changes and transport drops.
//!
//! Two ways a channel is replaced:
//!
//! - **Re-authentication**: the user logged in again. The old channel is torn
//!   down and a new one opened with the new credential. Call membership is not
//!   restored; the caller joins again if it wants to.
//! - **Recovery**: the transport dropped. Reconnect with the same credential,
//!   backing off exponentially. The relay sees a brand new connection with a
//!   new id; the stale one was already removed from its call when its socket
//!   closed.
//!
//! Either way the local `PeerStore` is cleared before the new channel is used.

use std::time::Duration;

use crate::client::{ClientContext, EventReceiver, SignalingClient};
use crate::error::{Error, Result};
use crate::peer::PeerStore;

/// Default number of recovery attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first recovery attempt
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default backoff cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default timeout for one connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Retry and timeout settings for channel recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (zero-based): doubles each time, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Owns the current channel and replaces it when needed.
pub struct ReconnectCoordinator {
    context: ClientContext,
    policy: ReconnectPolicy,
    client: Option<SignalingClient>,
}

impl ReconnectCoordinator {
    pub fn new(context: ClientContext, policy: ReconnectPolicy) -> Self {
        Self {
            context,
            policy,
            client: None,
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// The open channel, if any.
    pub fn client(&self) -> Option<&SignalingClient> {
        self.client.as_ref()
    }

    /// The open channel, or `NotConnected`.
    pub fn active(&self) -> Result<&SignalingClient> {
        self.client.as_ref().ok_or(Error::NotConnected)
    }

    /// Open the first channel. A single attempt; use [`recover`](Self::recover)
    /// for retries.
    pub async fn connect(&mut self, store: &mut PeerStore) -> Result<EventReceiver> {
        self.teardown(store);
        self.open(store).await
    }

    /// Replace the credential and reopen the channel with it.
    ///
    /// The previous channel is closed first; the relay removes it from its call.
    pub async fn reauthenticate(
        &mut self,
        credential: impl Into<String>,
        store: &mut PeerStore,
    ) -> Result<EventReceiver> {
        self.teardown(store);
        self.context.credential = credential.into();
        tracing::info!("Credential updated, reopening relay channel");
        self.open(store).await
    }

    /// Reconnect after a transport drop, with backoff.
    ///
    /// Stops at the first `Unauthenticated`: retrying a rejected credential
    /// cannot succeed.
    pub async fn recover(&mut self, store: &mut PeerStore) -> Result<EventReceiver> {
        self.teardown(store);

        let mut last_error = Error::NotConnected;
        for attempt in 0..self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to relay after backoff..."
            );
            tokio::time::sleep(delay).await;

            match self.open(store).await {
                Ok(events) => return Ok(events),
                Err(e @ Error::Unauthenticated(_)) => {
                    tracing::warn!(error = %e, "Relay rejected credential, giving up");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Close the channel and drop every peer record.
    pub fn disconnect(&mut self, store: &mut PeerStore) {
        self.teardown(store);
    }

    fn teardown(&mut self, store: &mut PeerStore) {
        if let Some(client) = self.client.take() {
            tracing::debug!(connection_id = client.connection_id(), "Closing relay channel");
            client.close();
        }
        store.clear();
    }

    async fn open(&mut self, store: &mut PeerStore) -> Result<EventReceiver> {
        let (client, events) =
            SignalingClient::connect_with_timeout(&self.context, self.policy.connect_timeout).await?;

        store.reset(client.connection_id().to_string());
        self.client = Some(client);
        Ok(events)
    }
}
