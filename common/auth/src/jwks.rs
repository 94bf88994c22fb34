use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Fetches a remote JWKS document and converts its entries into decoding keys.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        let mut keys = Vec::new();
        for entry in body.keys.into_iter() {
            match decode_entry(entry) {
                Some(pair) => keys.push(pair),
                None => debug!(url = %self.url, "skipping unusable JWKS entry"),
            }
        }

        Ok(keys)
    }
}

// Entries without a kid or RSA components cannot serve verification; they are
// skipped rather than failing the whole document.
fn decode_entry(entry: JwkEntry) -> Option<(String, DecodingKey)> {
    let kid = entry.kid?;
    let kty = entry.kty.unwrap_or_else(|| "RSA".to_string());
    if kty != "RSA" {
        return None;
    }
    let modulus = entry.n?;
    let exponent = entry.e?;
    let key = DecodingKey::from_rsa_components(&modulus, &exponent).ok()?;
    Some((kid, key))
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// Time-bound cache in front of a [`JwksFetcher`]. Concurrent refreshes on a
/// cache miss are tolerated as redundant; both writers fetch the same
/// authoritative document and the last one wins.
#[derive(Clone)]
pub struct JwksCache {
    fetcher: JwksFetcher,
    ttl: Duration,
    inner: Arc<RwLock<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl JwksCache {
    pub fn new(fetcher: JwksFetcher, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            inner: Arc::new(RwLock::new(CacheState::default())),
        }
    }

    pub fn url(&self) -> &str {
        self.fetcher.url()
    }

    fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().expect("rwlock poisoned");
        let fresh = guard
            .fetched_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false);
        if fresh {
            guard.keys.get(kid).cloned()
        } else {
            None
        }
    }

    /// Resolve a key id, refreshing the cached document when it is stale or
    /// does not know the kid. A kid the refreshed document still does not
    /// contain reports as `jwks_missing_keys`.
    pub async fn key_for(&self, kid: &str) -> AuthResult<DecodingKey> {
        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }

        let fetched = self.refresh().await?;
        debug!(count = fetched, kid, "refreshed JWKS document");

        let guard = self.inner.read().expect("rwlock poisoned");
        guard
            .keys
            .get(kid)
            .cloned()
            .ok_or(AuthError::JwksMissingKeys)
    }

    pub async fn refresh(&self) -> AuthResult<usize> {
        let keys = self.fetcher.fetch().await?;
        if keys.is_empty() {
            return Err(AuthError::JwksMissingKeys);
        }
        let count = keys.len();
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.keys = keys.into_iter().collect();
        guard.fetched_at = Some(Instant::now());
        Ok(count)
    }
}
