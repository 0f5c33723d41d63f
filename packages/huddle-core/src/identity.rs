//! # Identity
//!
//! The user identity attached to an authenticated connection, and the two
//! collaborator contracts of the account service:
//!
//! - [`IdentityVerifier`]: bearer credential → [`Identity`] or `Unauthenticated`
//! - [`CredentialIssuer`]: [`Identity`] → bearer credential
//!
//! Neither contract is implemented here. The relay ships a JWT implementation;
//! tests use in-memory ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A verified user identity.
///
/// Established once per connection and never mutated afterwards. A new
/// credential means a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable, opaque user identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Account email
    pub email: String,

    /// When the account was created
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// The fields other call participants are allowed to see.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The public projection of an [`Identity`], sent to other call members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Stable user identifier
    pub id: String,

    /// Display name
    pub name: String,
}

/// Validates a bearer credential and returns the identity it names.
///
/// Any failure (bad signature, expired, unknown subject) must come back as
/// [`Error::Unauthenticated`](crate::Error::Unauthenticated).
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` and resolve it to an identity.
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// Issues (or refreshes) a bearer credential for an identity.
pub trait CredentialIssuer: Send + Sync {
    /// Produce a credential that [`IdentityVerifier::verify`] will accept.
    fn issue(&self, identity: &Identity) -> Result<String>;
}
