use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};
use crate::identity::AuthPrincipal;

const DEFAULT_TTL_SECONDS: i64 = 60 * 60 * 24 * 30;

/// Signs claim sets built from a principal plus the standard registered
/// claims. The claim map stays open for enrichment between
/// [`JwtIssuer::claims_for`] and [`JwtIssuer::sign`], which is where the
/// embedding application's jwt callback runs.
#[derive(Clone)]
pub struct JwtIssuer {
    key: EncodingKey,
    algorithm: Algorithm,
    kid: Option<String>,
    issuer: Option<String>,
    audience: Option<String>,
    ttl_seconds: i64,
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("algorithm", &self.algorithm)
            .field("kid", &self.kid)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl JwtIssuer {
    /// Symmetric HS256 issuer. An empty secret is a configuration error.
    pub fn hs256(secret: &str) -> AuthResult<Self> {
        if secret.trim().is_empty() {
            return Err(AuthError::MissingJwtSecret);
        }
        Ok(Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            kid: None,
            issuer: None,
            audience: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        })
    }

    /// RS256 issuer from a PEM private key, tagged with the given kid.
    pub fn rs256_pem(pem: &[u8], kid: impl Into<String>) -> AuthResult<Self> {
        let kid = kid.into();
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        Ok(Self {
            key,
            algorithm: Algorithm::RS256,
            kid: Some(kid),
            issuer: None,
            audience: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        })
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Standard claims for a principal: sub, iat, nbf, exp, optional iss/aud,
    /// plus the principal's roles and attributes.
    pub fn claims_for(&self, principal: &AuthPrincipal) -> Map<String, Value> {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), Value::String(principal.id.clone()));
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert("nbf".to_string(), Value::from(now));
        claims.insert("exp".to_string(), Value::from(now + self.ttl_seconds));
        if let Some(issuer) = &self.issuer {
            claims.insert("iss".to_string(), Value::String(issuer.clone()));
        }
        if let Some(audience) = &self.audience {
            claims.insert("aud".to_string(), Value::String(audience.clone()));
        }
        claims.insert(
            "roles".to_string(),
            Value::Array(
                principal
                    .roles
                    .iter()
                    .map(|role| Value::String(role.clone()))
                    .collect(),
            ),
        );
        if !principal.attributes.is_empty() {
            claims.insert(
                "attrs".to_string(),
                Value::Object(principal.attributes.clone().into_iter().collect()),
            );
        }
        claims
    }

    pub fn sign(&self, claims: &Map<String, Value>) -> AuthResult<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.kid.clone();
        encode(&header, claims, &self.key).map_err(|err| AuthError::Signing(err.to_string()))
    }
}
