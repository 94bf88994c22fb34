use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use common_auth::claims::claim_timestamp;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tokens::sha256_hex;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{endpoint} request failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint} returned HTTP {status}")]
    UpstreamStatus {
        endpoint: &'static str,
        status: u16,
    },
    #[error("token endpoint returned an empty body")]
    EmptyResponse,
    #[error("failed to decode {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
    #[error("token response contained no access token")]
    MissingAccessToken,
}

impl OAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::Transport { .. } => "oauth_request_failed",
            OAuthError::UpstreamStatus { .. } => "oauth_upstream_status",
            OAuthError::EmptyResponse => "oauth_empty_response",
            OAuthError::Decode { .. } => "oauth_decode_failed",
            OAuthError::MissingAccessToken => "oauth_missing_access_token",
        }
    }

    /// Upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            OAuthError::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How the client proves itself to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic authentication with client id and secret.
    Basic,
    /// client_id / client_secret embedded in the request body.
    Body,
}

#[derive(Debug, Clone)]
pub struct OAuth2ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub introspection_endpoint: Option<String>,
    pub auth_method: ClientAuthMethod,
    /// TTL for cached introspection results.
    pub introspection_cache_ttl: Duration,
    /// Clock skew applied to exp/nbf checks on cached introspection claims.
    pub leeway_seconds: u32,
}

pub enum TokenGrant<'a> {
    AuthorizationCode {
        code: &'a str,
        redirect_uri: &'a str,
    },
    ClientCredentials {
        scope: Option<&'a str>,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

/// Wire-level token response with lenient field coercion: numeric-or-string
/// timestamps, optional scope, unknown fields preserved.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub expires_in: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthIntrospectionResult {
    #[serde(default)]
    pub active: bool,
    pub scope: Option<String>,
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub exp: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub nbf: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(claim_timestamp))
}

impl OAuthIntrospectionResult {
    /// Cached claims re-run the skew-widened validity check on every use so a
    /// stale cache entry for an expired token never authorizes a request.
    pub fn currently_valid(&self, leeway_seconds: u32) -> bool {
        let now = Utc::now().timestamp();
        let skew = i64::from(leeway_seconds);
        if let Some(exp) = self.exp {
            if now - skew > exp {
                return false;
            }
        }
        if let Some(nbf) = self.nbf {
            if now + skew < nbf {
                return false;
            }
        }
        self.active
    }
}

struct IntrospectionCache {
    ttl: Duration,
    inner: RwLock<HashMap<String, (OAuthIntrospectionResult, Instant)>>,
}

impl IntrospectionCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, token: &str) -> Option<OAuthIntrospectionResult> {
        let guard = self.inner.read().expect("rwlock poisoned");
        guard
            .get(&sha256_hex(token))
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(result, _)| result.clone())
    }

    fn put(&self, token: &str, result: OAuthIntrospectionResult) {
        let mut guard = self.inner.write().expect("rwlock poisoned");
        guard.insert(sha256_hex(token), (result, Instant::now()));
    }
}

/// Token-endpoint grant exchange, user-info fetch and token introspection
/// with local caching.
pub struct OAuth2Client {
    http: Client,
    config: OAuth2ClientConfig,
    introspection_cache: IntrospectionCache,
}

impl OAuth2Client {
    pub fn new(config: OAuth2ClientConfig) -> Self {
        Self::with_http(Client::new(), config)
    }

    pub fn with_http(http: Client, config: OAuth2ClientConfig) -> Self {
        let cache = IntrospectionCache::new(config.introspection_cache_ttl);
        Self {
            http,
            config,
            introspection_cache: cache,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub async fn exchange(&self, grant: TokenGrant<'_>) -> Result<OAuthTokenResponse, OAuthError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        match grant {
            TokenGrant::AuthorizationCode { code, redirect_uri } => {
                params.push(("grant_type", "authorization_code".to_string()));
                params.push(("code", code.to_string()));
                params.push(("redirect_uri", redirect_uri.to_string()));
            }
            TokenGrant::ClientCredentials { scope } => {
                params.push(("grant_type", "client_credentials".to_string()));
                if let Some(scope) = scope {
                    params.push(("scope", scope.to_string()));
                }
            }
            TokenGrant::RefreshToken { refresh_token } => {
                params.push(("grant_type", "refresh_token".to_string()));
                params.push(("refresh_token", refresh_token.to_string()));
            }
        }

        let mut request = self.http.post(&self.config.token_endpoint);
        match self.config.auth_method {
            ClientAuthMethod::Basic => {
                request = request.basic_auth(
                    &self.config.client_id,
                    Some(&self.config.client_secret),
                );
            }
            ClientAuthMethod::Body => {
                params.push(("client_id", self.config.client_id.clone()));
                params.push(("client_secret", self.config.client_secret.clone()));
            }
        }

        let response = request
            .form(&params)
            .send()
            .await
            .map_err(|err| OAuthError::Transport {
                endpoint: "token",
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UpstreamStatus {
                endpoint: "token",
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(|err| OAuthError::Transport {
            endpoint: "token",
            message: err.to_string(),
        })?;
        if body.trim().is_empty() {
            return Err(OAuthError::EmptyResponse);
        }

        decode_token_response(&content_type, &body)
    }

    pub async fn fetch_userinfo(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<Map<String, Value>, OAuthError> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| OAuthError::Transport {
                endpoint: "userinfo",
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UpstreamStatus {
                endpoint: "userinfo",
                status: status.as_u16(),
            });
        }

        response
            .json::<Map<String, Value>>()
            .await
            .map_err(|err| OAuthError::Decode {
                endpoint: "userinfo",
                message: err.to_string(),
            })
    }

    /// Report whether a token is currently active. `active:false`, a
    /// transport failure and an upstream error all read as invalid — never
    /// as an error the caller could mistake for "valid". Active results are
    /// cached per token value for the configured TTL.
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
        extra_params: &[(String, String)],
    ) -> Option<OAuthIntrospectionResult> {
        if let Some(cached) = self.introspection_cache.get(token) {
            debug!("introspection cache hit");
            if cached.currently_valid(self.config.leeway_seconds) {
                return Some(cached);
            }
            return None;
        }

        let endpoint = self.config.introspection_endpoint.as_deref()?;

        let mut params: Vec<(&str, String)> = vec![("token", token.to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint", hint.to_string()));
        }
        for (key, value) in extra_params {
            params.push((key.as_str(), value.clone()));
        }

        let mut request = self.http.post(endpoint);
        match self.config.auth_method {
            ClientAuthMethod::Basic => {
                request = request.basic_auth(
                    &self.config.client_id,
                    Some(&self.config.client_secret),
                );
            }
            ClientAuthMethod::Body => {
                params.push(("client_id", self.config.client_id.clone()));
                params.push(("client_secret", self.config.client_secret.clone()));
            }
        }

        let response = match request.form(&params).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "introspection request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "introspection returned an error status");
            return None;
        }

        let result = match response.json::<OAuthIntrospectionResult>().await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "introspection response did not decode");
                return None;
            }
        };

        if !result.active {
            return None;
        }
        self.introspection_cache.put(token, result.clone());
        if result.currently_valid(self.config.leeway_seconds) {
            Some(result)
        } else {
            None
        }
    }
}

/// Token responses arrive as JSON or form-urlencoded; the content type
/// decides, with a try-JSON-first heuristic for anything ambiguous.
fn decode_token_response(
    content_type: &str,
    body: &str,
) -> Result<OAuthTokenResponse, OAuthError> {
    if content_type.contains("json") {
        return serde_json::from_str(body).map_err(|err| OAuthError::Decode {
            endpoint: "token",
            message: err.to_string(),
        });
    }
    if content_type.contains("x-www-form-urlencoded") {
        return decode_form_response(body);
    }
    match serde_json::from_str(body) {
        Ok(response) => Ok(response),
        Err(_) => decode_form_response(body),
    }
}

fn decode_form_response(body: &str) -> Result<OAuthTokenResponse, OAuthError> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
        map.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    serde_json::from_value(Value::Object(map)).map_err(|err| OAuthError::Decode {
        endpoint: "token",
        message: err.to_string(),
    })
}
