//! HS256 session tokens.
//!
//! The account service signs a token per login; the relay only needs the
//! shared secret to check it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use huddle_core::{CredentialIssuer, Error, Identity, IdentityVerifier, Result};

/// Default token lifetime, matching the session cookie.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    email: String,
    created_at: DateTime<Utc>,
    iat: i64,
    exp: i64,
}

/// Verifies (and issues) HS256 JWTs carrying the user identity.
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl: Duration::days(DEFAULT_TOKEN_TTL_DAYS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| Error::Unauthenticated(e.to_string()))?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(Error::Unauthenticated("token missing subject".into()));
        }

        Ok(Identity {
            id: claims.sub,
            name: claims.name,
            email: claims.email,
            created_at: claims.created_at,
        })
    }
}

impl CredentialIssuer for JwtIdentityVerifier {
    fn issue(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            created_at: identity.created_at,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}
