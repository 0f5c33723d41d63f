//! Connection authentication.
//!
//! Runs on the HTTP upgrade request, before a WebSocket exists. The bearer
//! credential is looked up with an ordered list of [`CredentialSource`]s,
//! the first non-blank hit wins, and the result goes to the
//! [`IdentityVerifier`]. A rejected handshake never reaches the registry.

pub mod jwt;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use uuid::Uuid;

use huddle_core::protocol::ConnectionId;
use huddle_core::{Error, Identity, IdentityVerifier, Result};

pub use jwt::JwtIdentityVerifier;

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "jwt";

/// Query parameter accepted for clients that cannot set upgrade headers.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// The parts of an upgrade request a credential can come from.
#[derive(Debug, Clone, Copy)]
pub struct Handshake<'a> {
    headers: &'a HeaderMap,
    query: &'a HashMap<String, String>,
}

impl<'a> Handshake<'a> {
    pub fn new(headers: &'a HeaderMap, query: &'a HashMap<String, String>) -> Self {
        Self { headers, query }
    }
}

/// One place a credential may be carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// A named cookie in the `Cookie` header
    Cookie(String),
    /// `Authorization: Bearer <token>`
    AuthorizationBearer,
    /// A query string parameter
    QueryParam(String),
}

impl CredentialSource {
    /// The credential at this source, if present and not blank.
    pub fn extract(&self, handshake: &Handshake<'_>) -> Option<String> {
        let raw = match self {
            CredentialSource::Cookie(name) => handshake
                .headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(';'))
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(key, _)| key.trim() == name)
                .map(|(_, value)| value.to_string()),
            CredentialSource::AuthorizationBearer => handshake
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| {
                    let (scheme, token) = value.trim().split_once(' ')?;
                    scheme.eq_ignore_ascii_case("bearer").then(|| token.to_string())
                }),
            CredentialSource::QueryParam(name) => handshake.query.get(name).cloned(),
        }?;

        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Cookie first, then the explicit auth fields.
pub fn default_sources(cookie_name: &str) -> Vec<CredentialSource> {
    vec![
        CredentialSource::Cookie(cookie_name.to_string()),
        CredentialSource::AuthorizationBearer,
        CredentialSource::QueryParam(TOKEN_QUERY_PARAM.to_string()),
    ]
}

/// A handshake that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedConnection {
    /// Freshly assigned; never reused
    pub connection_id: ConnectionId,
    pub identity: Identity,
}

/// Gate in front of every connection.
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    sources: Vec<CredentialSource>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ConnectionAuthenticator {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, cookie_name: &str) -> Self {
        Self::with_sources(verifier, default_sources(cookie_name))
    }

    pub fn with_sources(verifier: Arc<dyn IdentityVerifier>, sources: Vec<CredentialSource>) -> Self {
        Self { sources, verifier }
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }

    /// First credential found, in source order.
    pub fn extract_token(&self, handshake: &Handshake<'_>) -> Option<String> {
        self.sources.iter().find_map(|source| source.extract(handshake))
    }

    /// Verify the handshake's credential and assign a connection id.
    pub async fn authenticate(&self, handshake: &Handshake<'_>) -> Result<AuthenticatedConnection> {
        let token = self
            .extract_token(handshake)
            .ok_or_else(|| Error::Unauthenticated("no credential presented".into()))?;

        let identity = self.verifier.verify(&token).await.map_err(|e| match e {
            Error::Unauthenticated(_) => e,
            other => Error::Unauthenticated(other.to_string()),
        })?;

        Ok(AuthenticatedConnection {
            connection_id: Uuid::new_v4().to_string(),
            identity,
        })
    }
}

impl std::fmt::Debug for ConnectionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAuthenticator")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}
