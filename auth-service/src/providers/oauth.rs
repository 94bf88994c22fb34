use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use common_auth::AuthUser;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use url::Url;

use crate::error::{FlowError, FlowResult};
use crate::oauth::{OAuth2Client, OAuthError, OAuthTokenResponse, TokenGrant};
use crate::tokens::{random_token, sha256_hex};

type HmacSha256 = Hmac<Sha256>;

/// Maps an upstream profile document into an [`AuthUser`]. `enrich_profile`
/// is for post-processing that needs an extra authenticated call, e.g.
/// fetching a primary verified email the main profile omits; it is
/// best-effort and a failure skips the enrichment rather than failing the
/// sign-in.
#[async_trait]
pub trait ProfileMapper: Send + Sync {
    fn map_profile(&self, profile: &Map<String, Value>) -> anyhow::Result<AuthUser>;

    async fn enrich_profile(
        &self,
        _http: &Client,
        _access_token: &str,
        user: AuthUser,
    ) -> anyhow::Result<AuthUser> {
        Ok(user)
    }
}

/// Mapper for providers that follow the standard OIDC userinfo shape:
/// `sub`, `email`, `name`, `picture`.
pub struct OidcProfileMapper;

impl ProfileMapper for OidcProfileMapper {
    fn map_profile(&self, profile: &Map<String, Value>) -> anyhow::Result<AuthUser> {
        let id = profile
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("profile is missing 'sub'"))?;
        let mut user = AuthUser::new(id).map_err(|err| anyhow::anyhow!("{err}"))?;
        if let Some(email) = profile.get("email").and_then(Value::as_str) {
            user = user.with_email(email);
        }
        if let Some(name) = profile.get("name").and_then(Value::as_str) {
            user = user.with_name(name);
        }
        if let Some(picture) = profile.get("picture").and_then(Value::as_str) {
            user = user.with_image(picture);
        }
        Ok(user)
    }
}

/// Signed `state` parameter binding the anonymous client session to the
/// eventual callback, closing the CSRF / session-fixation window across the
/// redirect.
#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
    ttl_seconds: i64,
}

#[derive(Serialize, Deserialize)]
struct StatePayload {
    n: String,
    b: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cb: Option<String>,
    exp: i64,
}

pub struct StateClaims {
    pub callback_url: Option<String>,
}

impl StateSigner {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_seconds,
        }
    }

    fn tag(&self, data: &str) -> FlowResult<String> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| FlowError::Internal("invalid state-signing key".to_string()))?;
        mac.update(data.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    pub fn sign(&self, binding: &str, callback_url: Option<&str>) -> FlowResult<String> {
        let payload = StatePayload {
            n: random_token(),
            b: sha256_hex(binding),
            cb: callback_url.map(ToString::to_string),
            exp: Utc::now().timestamp() + self.ttl_seconds,
        };
        let bytes = serde_json::to_vec(&payload).map_err(FlowError::internal)?;
        let encoded = URL_SAFE_NO_PAD.encode(bytes);
        let tag = self.tag(&encoded)?;
        Ok(format!("{encoded}.{tag}"))
    }

    pub fn verify(&self, state: &str, binding: &str) -> FlowResult<StateClaims> {
        let (encoded, tag) = state.split_once('.').ok_or(FlowError::InvalidState)?;
        let expected = self.tag(encoded)?;
        let authentic: bool = expected.as_bytes().ct_eq(tag.as_bytes()).into();
        if !authentic {
            return Err(FlowError::InvalidState);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| FlowError::InvalidState)?;
        let payload: StatePayload =
            serde_json::from_slice(&bytes).map_err(|_| FlowError::InvalidState)?;
        if payload.exp <= Utc::now().timestamp() {
            return Err(FlowError::InvalidState);
        }
        if payload.b != sha256_hex(binding) {
            return Err(FlowError::InvalidState);
        }
        Ok(StateClaims {
            callback_url: payload.cb,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub id: String,
    pub name: String,
    pub authorization_endpoint: String,
    pub userinfo_endpoint: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

pub struct OAuthProvider {
    config: OAuthProviderConfig,
    client: OAuth2Client,
    http: Client,
    mapper: Arc<dyn ProfileMapper>,
    state_signer: StateSigner,
}

impl OAuthProvider {
    pub fn new(
        config: OAuthProviderConfig,
        client: OAuth2Client,
        mapper: Arc<dyn ProfileMapper>,
        state_signer: StateSigner,
    ) -> Self {
        Self {
            config,
            client,
            http: Client::new(),
            mapper,
            state_signer,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn client(&self) -> &OAuth2Client {
        &self.client
    }

    /// The authorization redirect target, with a signed `state` bound to the
    /// caller's anonymous session.
    pub fn authorization_url(
        &self,
        binding: &str,
        callback_url: Option<&str>,
    ) -> FlowResult<String> {
        let state = self.state_signer.sign(binding, callback_url)?;
        let mut url =
            Url::parse(&self.config.authorization_endpoint).map_err(FlowError::internal)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.client.client_id())
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state);
        Ok(url.to_string())
    }

    /// Verify state, exchange the code, fetch and map the profile.
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
        binding: &str,
    ) -> FlowResult<(AuthUser, OAuthTokenResponse, Option<String>)> {
        let state_claims = self.state_signer.verify(state, binding)?;

        let tokens = self
            .client
            .exchange(TokenGrant::AuthorizationCode {
                code,
                redirect_uri: &self.config.redirect_uri,
            })
            .await?;
        let access_token = tokens
            .access_token
            .clone()
            .ok_or(OAuthError::MissingAccessToken)?;

        let profile = self
            .client
            .fetch_userinfo(&self.config.userinfo_endpoint, &access_token)
            .await?;
        let user = self
            .mapper
            .map_profile(&profile)
            .map_err(|err| FlowError::ProfileMapping(err.to_string()))?;

        let user = match self
            .mapper
            .enrich_profile(&self.http, &access_token, user.clone())
            .await
        {
            Ok(enriched) => enriched,
            Err(err) => {
                warn!(
                    provider = %self.config.id,
                    error = %err,
                    "profile enrichment failed, skipping"
                );
                user
            }
        };

        Ok((user, tokens, state_claims.callback_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{ClientAuthMethod, OAuth2ClientConfig};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    struct TestMapper;

    impl ProfileMapper for TestMapper {
        fn map_profile(&self, profile: &Map<String, Value>) -> anyhow::Result<AuthUser> {
            let id = profile
                .get("sub")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("profile missing sub"))?;
            let mut user = AuthUser::new(id)?;
            if let Some(email) = profile.get("email").and_then(Value::as_str) {
                user = user.with_email(email);
            }
            Ok(user)
        }
    }

    struct FailingEnricher;

    #[async_trait]
    impl ProfileMapper for FailingEnricher {
        fn map_profile(&self, profile: &Map<String, Value>) -> anyhow::Result<AuthUser> {
            TestMapper.map_profile(profile)
        }

        async fn enrich_profile(
            &self,
            _http: &Client,
            _access_token: &str,
            _user: AuthUser,
        ) -> anyhow::Result<AuthUser> {
            anyhow::bail!("upstream email endpoint unavailable")
        }
    }

    fn provider_for(server: &MockServer, mapper: Arc<dyn ProfileMapper>) -> OAuthProvider {
        let client = OAuth2Client::new(OAuth2ClientConfig {
            client_id: "client-1".into(),
            client_secret: "shhh".into(),
            token_endpoint: format!("{}/token", server.base_url()),
            introspection_endpoint: None,
            auth_method: ClientAuthMethod::Body,
            introspection_cache_ttl: Duration::from_secs(60),
            leeway_seconds: 30,
        });
        OAuthProvider::new(
            OAuthProviderConfig {
                id: "acme".into(),
                name: "Acme".into(),
                authorization_endpoint: "https://id.acme.test/authorize".into(),
                userinfo_endpoint: format!("{}/userinfo", server.base_url()),
                redirect_uri: "https://app.example.com/auth/callback/acme".into(),
                scopes: vec!["openid".into(), "email".into()],
            },
            client,
            mapper,
            StateSigner::new("state-secret", 600),
        )
    }

    #[test]
    fn state_round_trips_with_matching_binding() {
        let signer = StateSigner::new("secret", 600);
        let state = signer.sign("session-1", Some("/dashboard")).expect("sign");
        let claims = signer.verify(&state, "session-1").expect("verify");
        assert_eq!(claims.callback_url.as_deref(), Some("/dashboard"));
    }

    #[test]
    fn state_rejects_tampering_and_wrong_binding() {
        let signer = StateSigner::new("secret", 600);
        let state = signer.sign("session-1", None).expect("sign");

        let mut tampered = state.clone();
        tampered.push('x');
        assert!(matches!(
            signer.verify(&tampered, "session-1"),
            Err(FlowError::InvalidState)
        ));
        assert!(matches!(
            signer.verify(&state, "other-session"),
            Err(FlowError::InvalidState)
        ));
    }

    #[test]
    fn expired_state_is_rejected() {
        let signer = StateSigner::new("secret", -1);
        let state = signer.sign("session-1", None).expect("sign");
        assert!(matches!(
            signer.verify(&state, "session-1"),
            Err(FlowError::InvalidState)
        ));
    }

    #[test]
    fn authorization_url_carries_the_request() {
        let server = MockServer::start();
        let provider = provider_for(&server, Arc::new(TestMapper));
        let url = provider
            .authorization_url("session-1", None)
            .expect("authorization url");
        assert!(url.starts_with("https://id.acme.test/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("scope=openid+email"));
        assert!(url.contains("state="));
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_maps_profile() {
        let server = MockServer::start();
        let _token = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=authorization_code");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "access_token": "at-1", "token_type": "Bearer" }));
        });
        let _userinfo = server.mock(|when, then| {
            when.method(GET)
                .path("/userinfo")
                .header("authorization", "Bearer at-1");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "sub": "acct-9", "email": "person@acme.test" }));
        });

        let provider = provider_for(&server, Arc::new(TestMapper));
        let state = provider
            .state_signer
            .sign("session-1", Some("/home"))
            .expect("state");
        let (user, tokens, callback_url) = provider
            .handle_callback("code-1", &state, "session-1")
            .await
            .expect("callback");
        assert_eq!(user.id, "acct-9");
        assert_eq!(user.email.as_deref(), Some("person@acme.test"));
        assert_eq!(tokens.access_token.as_deref(), Some("at-1"));
        assert_eq!(callback_url.as_deref(), Some("/home"));
    }

    #[tokio::test]
    async fn enrichment_failure_does_not_fail_sign_in() {
        let server = MockServer::start();
        let _token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "access_token": "at-1" }));
        });
        let _userinfo = server.mock(|when, then| {
            when.method(GET).path("/userinfo");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "sub": "acct-9" }));
        });

        let provider = provider_for(&server, Arc::new(FailingEnricher));
        let state = provider.state_signer.sign("session-1", None).expect("state");
        let (user, _, _) = provider
            .handle_callback("code-1", &state, "session-1")
            .await
            .expect("callback survives enrichment failure");
        assert_eq!(user.id, "acct-9");
    }
}
