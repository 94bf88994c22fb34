use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use crate::claims::{audience_matches, claim_timestamp, JwtPayload};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::jwks::{JwksCache, JwksFetcher};

/// Thread-safe store for inline decoding keys.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.insert(kid.into(), key);
    }

    pub fn insert_secret(&self, kid: impl Into<String>, secret: &str) {
        self.insert_key(kid, DecodingKey::from_secret(secret.as_bytes()));
    }

    pub fn insert_rsa_pem(&self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<()> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        self.insert_key(kid, key);
        Ok(())
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.contains_key(kid)
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard.is_empty()
    }

    /// The only registered key, if exactly one exists. Lets kid-less tokens
    /// (typical for HS256) resolve unambiguously.
    pub fn single(&self) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        if guard.len() == 1 {
            guard.values().next().cloned()
        } else {
            None
        }
    }
}

/// Verifies compact JWTs in a strict order, each failure carrying a stable
/// machine-readable code: parse, key resolution, signature, issuer/audience,
/// required claims, then the skew-widened exp/nbf window.
#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    store: InMemoryKeyStore,
    jwks: Option<JwksCache>,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            config,
            store: InMemoryKeyStore::new(),
            jwks: None,
        }
    }

    pub fn builder(config: JwtConfig) -> JwtVerifierBuilder {
        JwtVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    async fn resolve_key(&self, kid: Option<&str>) -> AuthResult<DecodingKey> {
        match kid {
            Some(kid) => {
                if let Some(key) = self.store.get(kid) {
                    return Ok(key);
                }
                match &self.jwks {
                    Some(cache) => cache.key_for(kid).await,
                    None if self.store.is_empty() => Err(AuthError::NoKeysConfigured),
                    None => Err(AuthError::UnknownKeyId(kid.to_string())),
                }
            }
            None => {
                if let Some(key) = self.store.single() {
                    return Ok(key);
                }
                if self.store.is_empty() && self.jwks.is_none() {
                    Err(AuthError::NoKeysConfigured)
                } else {
                    Err(AuthError::MissingKeyId)
                }
            }
        }
    }

    pub async fn verify(&self, token: &str) -> AuthResult<JwtPayload> {
        let header = decode_header(token).map_err(|_| AuthError::InvalidFormat)?;
        let key = self.resolve_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.config.algorithms.clone();
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_)
                | ErrorKind::InvalidToken => AuthError::InvalidFormat,
                _ => AuthError::SignatureVerification,
            }
        })?;
        let claims = data.claims;

        if let Some(expected) = &self.config.issuer {
            let matches = claims
                .get("iss")
                .and_then(Value::as_str)
                .map(|iss| iss == expected)
                .unwrap_or(false);
            if !matches {
                return Err(AuthError::IssuerMismatch);
            }
        }

        if let Some(expected) = &self.config.audience {
            let matches = claims
                .get("aud")
                .map(|aud| audience_matches(aud, expected))
                .unwrap_or(false);
            if !matches {
                return Err(AuthError::AudienceMismatch);
            }
        }

        for name in &self.config.required_claims {
            let present = claims.get(name).map(|value| !value.is_null()).unwrap_or(false);
            if !present {
                return Err(AuthError::MissingClaim(name.clone()));
            }
        }

        let now = Utc::now().timestamp();
        let skew = i64::from(self.config.leeway_seconds);
        if let Some(exp) = claims.get("exp").and_then(claim_timestamp) {
            if now - skew > exp {
                return Err(AuthError::TokenExpired);
            }
        }
        if let Some(nbf) = claims.get("nbf").and_then(claim_timestamp) {
            if now + skew < nbf {
                return Err(AuthError::TokenNotYetValid);
            }
        }

        debug!(sub = ?claims.get("sub"), "verified JWT");
        Ok(JwtPayload::from_verified(claims))
    }
}

pub struct JwtVerifierBuilder {
    config: JwtConfig,
    store: InMemoryKeyStore,
    jwks: Option<JwksCache>,
}

impl JwtVerifierBuilder {
    fn new(config: JwtConfig) -> Self {
        Self {
            config,
            store: InMemoryKeyStore::new(),
            jwks: None,
        }
    }

    pub fn with_store(mut self, store: InMemoryKeyStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_decoding_key(self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.store.insert_key(kid, key);
        self
    }

    pub fn with_secret(self, kid: impl Into<String>, secret: &str) -> Self {
        self.store.insert_secret(kid, secret);
        self
    }

    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> AuthResult<Self> {
        self.store.insert_rsa_pem(kid, pem)?;
        Ok(self)
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>, cache_ttl: Duration) -> Self {
        self.jwks = Some(JwksCache::new(JwksFetcher::new(url), cache_ttl));
        self
    }

    pub fn with_jwks_cache(mut self, cache: JwksCache) -> Self {
        self.jwks = Some(cache);
        self
    }

    pub fn build(self) -> JwtVerifier {
        JwtVerifier {
            config: self.config,
            store: self.store,
            jwks: self.jwks,
        }
    }
}
