use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common_auth::{AuthCredentials, AuthPrincipal, AuthUser};
use tracing::{debug, warn};

use crate::accounts::{AccountStore, AuthAccount, InMemoryAccountStore};
use crate::callbacks::{AuthCallbacks, DefaultCallbacks, SignInDecision};
use crate::csrf::CsrfGuard;
use crate::error::{FlowError, FlowResult};
use crate::events::{AuthEvent, AuthEventListener, NullEventListener};
use crate::providers::{Provider, ProviderKind, ProviderRegistry};
use crate::remember::{InMemoryRememberTokenStore, RememberTokens};
use crate::session::{
    AuthSession, InMemorySessionStore, SessionRecord, SessionStore, SessionStrategy,
};
use crate::tokens::random_token;

const ANON_SESSION_TTL_SECONDS: i64 = 60 * 60;

/// What the transport layer knows about the in-flight request: presented
/// cookies and the submitted CSRF token.
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    /// Session cookie value: opaque id or signed JWT, per strategy.
    pub session_token: Option<String>,
    /// Anonymous session cookie, the CSRF binding.
    pub anon_session_id: Option<String>,
    /// CSRF token submitted with a state-changing call.
    pub csrf_token: Option<String>,
    /// Remember-me cookie value, if presented.
    pub remember_token: Option<String>,
    /// Whether the caller asked for a remember token at sign-in.
    pub remember: bool,
}

pub struct SignInOutcome {
    pub session: AuthSession,
    /// Value for the strategy cookie; always reissued alongside the session.
    pub session_cookie: String,
    pub remember_cookie: Option<String>,
}

/// A sign-in call either issues a session (credentials, oauth callback) or
/// parks the flow behind an emailed token.
pub enum SignInResponse {
    Session(SignInOutcome),
    VerificationSent { identifier: String },
}

/// Result of resolving the session for a request, including any cookie
/// changes the transport layer must apply.
pub struct SessionResolution {
    pub session: Option<AuthSession>,
    pub set_session_cookie: Option<String>,
    pub set_remember_cookie: Option<String>,
    /// A presented remember token was stale: clear the cookie, never retry.
    pub clear_remember: bool,
}

impl SessionResolution {
    fn unauthenticated(clear_remember: bool) -> Self {
        Self {
            session: None,
            set_session_cookie: None,
            set_remember_cookie: None,
            clear_remember,
        }
    }
}

/// Orchestrates providers, the session strategy, CSRF, callbacks and events.
/// Within one request the order is fixed: CSRF validation, then the
/// provider, then the sign-in callback, then session construction, then
/// session/jwt enrichment, and cookie values last.
pub struct AuthManager {
    providers: ProviderRegistry,
    strategy: SessionStrategy,
    csrf: CsrfGuard,
    session_store: Arc<dyn SessionStore>,
    remember: RememberTokens,
    accounts: Arc<dyn AccountStore>,
    callbacks: Arc<dyn AuthCallbacks>,
    listener: Arc<dyn AuthEventListener>,
}

impl AuthManager {
    pub fn builder(strategy: SessionStrategy) -> AuthManagerBuilder {
        AuthManagerBuilder::new(strategy)
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn csrf_enabled(&self) -> bool {
        self.csrf.enabled()
    }

    pub fn provider_kind(&self, provider_id: &str) -> Option<ProviderKind> {
        self.providers.get(provider_id).map(Provider::kind)
    }

    /// Reuse the caller's anonymous session or mint one. Returns the id and
    /// whether it is new (the transport layer sets the cookie for new ids).
    pub async fn ensure_anon_session(&self, existing: Option<&str>) -> FlowResult<(String, bool)> {
        if let Some(id) = existing {
            if self
                .session_store
                .get(id)
                .await
                .map_err(FlowError::internal)?
                .is_some()
            {
                return Ok((id.to_string(), false));
            }
        }
        let id = random_token();
        let now = Utc::now();
        self.session_store
            .put(
                &id,
                SessionRecord {
                    principal: None,
                    issued_at: now,
                    expires_at: now + Duration::seconds(ANON_SESSION_TTL_SECONDS),
                    csrf_token: None,
                },
                StdDuration::from_secs(ANON_SESSION_TTL_SECONDS as u64),
            )
            .await
            .map_err(FlowError::internal)?;
        Ok((id, true))
    }

    /// Mint a CSRF token bound to the anonymous session.
    pub async fn issue_csrf(&self, existing: Option<&str>) -> FlowResult<(String, bool, String)> {
        let (session_id, created) = self.ensure_anon_session(existing).await?;
        let token = self.csrf.mint();
        let mut record = self
            .session_store
            .get(&session_id)
            .await
            .map_err(FlowError::internal)?
            .unwrap_or(SessionRecord {
                principal: None,
                issued_at: Utc::now(),
                expires_at: Utc::now() + Duration::seconds(ANON_SESSION_TTL_SECONDS),
                csrf_token: None,
            });
        record.csrf_token = Some(token.clone());
        self.session_store
            .put(
                &session_id,
                record,
                StdDuration::from_secs(ANON_SESSION_TTL_SECONDS as u64),
            )
            .await
            .map_err(FlowError::internal)?;
        Ok((session_id, created, token))
    }

    async fn verify_csrf(&self, ctx: &RequestContext) -> FlowResult<()> {
        if !self.csrf.enabled() {
            return Ok(());
        }
        let expected = match &ctx.anon_session_id {
            Some(id) => self
                .session_store
                .get(id)
                .await
                .map_err(FlowError::internal)?
                .and_then(|record| record.csrf_token),
            None => None,
        };
        self.csrf
            .verify(expected.as_deref(), ctx.csrf_token.as_deref())
    }

    pub async fn sign_in(
        &self,
        provider_id: &str,
        credentials: &AuthCredentials,
        ctx: &RequestContext,
    ) -> FlowResult<SignInResponse> {
        self.verify_csrf(ctx).await?;
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;

        match provider {
            Provider::Credentials(provider) => {
                let user = provider
                    .authorize(credentials)
                    .await
                    .map_err(FlowError::internal)?
                    .ok_or(FlowError::InvalidCredentials)?;
                self.finish_sign_in(provider_id, user, ctx)
                    .await
                    .map(SignInResponse::Session)
            }
            Provider::Email(provider) => {
                let identifier = credentials
                    .identifier()
                    .ok_or(FlowError::InvalidCredentials)?;
                provider.begin_sign_in(identifier, None).await?;
                Ok(SignInResponse::VerificationSent {
                    identifier: identifier.to_string(),
                })
            }
            Provider::OAuth(_) => {
                // The browser must round-trip through the authorization
                // endpoint; there is nothing to authorize here.
                Err(FlowError::UnsupportedOperation(provider_id.to_string()))
            }
        }
    }

    pub async fn register(
        &self,
        provider_id: &str,
        credentials: &AuthCredentials,
        ctx: &RequestContext,
    ) -> FlowResult<SignInOutcome> {
        self.verify_csrf(ctx).await?;
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;

        let Provider::Credentials(provider) = provider else {
            return Err(FlowError::UnsupportedOperation(provider_id.to_string()));
        };
        let user = provider
            .register(credentials)
            .await
            .map_err(FlowError::internal)?
            .ok_or(FlowError::InvalidCredentials)?;
        self.finish_sign_in(provider_id, user, ctx).await
    }

    /// The authorization redirect for an OAuth provider, with signed state
    /// bound to the caller's anonymous session.
    pub fn authorization_url(
        &self,
        provider_id: &str,
        binding: &str,
        callback_url: Option<&str>,
    ) -> FlowResult<String> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;
        let Provider::OAuth(provider) = provider else {
            return Err(FlowError::UnsupportedOperation(provider_id.to_string()));
        };
        provider.authorization_url(binding, callback_url)
    }

    pub async fn handle_oauth_callback(
        &self,
        provider_id: &str,
        code: &str,
        state: &str,
        ctx: &RequestContext,
    ) -> FlowResult<(SignInOutcome, Option<String>)> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;
        let Provider::OAuth(provider) = provider else {
            return Err(FlowError::UnsupportedOperation(provider_id.to_string()));
        };

        let binding = ctx.anon_session_id.clone().unwrap_or_default();
        let (user, tokens, callback_url) = provider.handle_callback(code, state, &binding).await?;

        // First linkage creates the account row; later sign-ins refresh its
        // tokens. (provider_id, provider_account_id) stays unique.
        let existing = self
            .accounts
            .find(provider_id, &user.id)
            .await
            .map_err(FlowError::internal)?;
        let user_id = existing
            .as_ref()
            .map(|account| account.user_id.clone())
            .unwrap_or_else(|| user.id.clone());
        let expires_at = tokens
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        self.accounts
            .upsert(AuthAccount {
                provider_id: provider_id.to_string(),
                provider_account_id: user.id.clone(),
                user_id,
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                expires_at,
                metadata: Default::default(),
            })
            .await
            .map_err(FlowError::internal)?;

        let outcome = self.finish_sign_in(provider_id, user, ctx).await?;
        Ok((outcome, callback_url))
    }

    pub async fn handle_email_callback(
        &self,
        provider_id: &str,
        identifier: &str,
        token: &str,
        ctx: &RequestContext,
    ) -> FlowResult<SignInOutcome> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;
        let Provider::Email(provider) = provider else {
            return Err(FlowError::UnsupportedOperation(provider_id.to_string()));
        };
        let user = provider.complete_sign_in(identifier, token).await?;
        self.finish_sign_in(provider_id, user, ctx).await
    }

    async fn finish_sign_in(
        &self,
        provider_id: &str,
        user: AuthUser,
        ctx: &RequestContext,
    ) -> FlowResult<SignInOutcome> {
        if let SignInDecision::Deny { reason } = self.callbacks.sign_in(&user, provider_id) {
            debug!(provider_id, ?reason, "sign-in vetoed by callback");
            return Err(FlowError::AccessDenied { reason });
        }

        let principal = user.to_principal();
        let issued = self
            .strategy
            .issue(&principal, self.callbacks.as_ref())
            .await?;
        let mut session = issued.session;
        self.callbacks.session(&mut session);

        let remember_cookie = if ctx.remember {
            Some(
                self.remember
                    .mint(&principal)
                    .await
                    .map_err(FlowError::internal)?,
            )
        } else {
            None
        };

        self.emit(AuthEvent::SignIn {
            provider_id: provider_id.to_string(),
            user,
            occurred_at: Utc::now(),
        })
        .await;

        Ok(SignInOutcome {
            session,
            session_cookie: issued.cookie_value,
            remember_cookie,
        })
    }

    /// Resolve the current session, transparently refreshing it once the
    /// update age is exceeded, and falling back to the remember token.
    pub async fn resolve_session(&self, ctx: &RequestContext) -> FlowResult<SessionResolution> {
        if let Some(token) = &ctx.session_token {
            if let Some(resolved) = self
                .strategy
                .resolve(token, self.callbacks.as_ref())
                .await?
            {
                let mut session = resolved.session;
                self.callbacks.session(&mut session);
                if resolved.rotated_cookie.is_some() {
                    self.emit(AuthEvent::Session {
                        principal_id: resolved.principal.id.clone(),
                        refreshed: true,
                        occurred_at: Utc::now(),
                    })
                    .await;
                }
                return Ok(SessionResolution {
                    session: Some(session),
                    set_session_cookie: resolved.rotated_cookie,
                    set_remember_cookie: None,
                    clear_remember: false,
                });
            }
        }

        let Some(remember_token) = &ctx.remember_token else {
            return Ok(SessionResolution::unauthenticated(false));
        };
        match self
            .remember
            .redeem(remember_token)
            .await
            .map_err(FlowError::internal)?
        {
            Some((principal, replacement)) => {
                let issued = self
                    .strategy
                    .issue(&principal, self.callbacks.as_ref())
                    .await?;
                let mut session = issued.session;
                self.callbacks.session(&mut session);
                self.emit(AuthEvent::Session {
                    principal_id: principal.id.clone(),
                    refreshed: true,
                    occurred_at: Utc::now(),
                })
                .await;
                Ok(SessionResolution {
                    session: Some(session),
                    set_session_cookie: Some(issued.cookie_value),
                    set_remember_cookie: Some(replacement),
                    clear_remember: false,
                })
            }
            None => Ok(SessionResolution::unauthenticated(true)),
        }
    }

    /// Swap the principal behind the session without re-authentication. The
    /// session/jwt callbacks re-run so derived claims stay consistent.
    pub async fn update_session(
        &self,
        ctx: &RequestContext,
        principal: AuthPrincipal,
    ) -> FlowResult<SignInOutcome> {
        if let Some(token) = &ctx.session_token {
            self.strategy.invalidate(token).await?;
        }
        let issued = self
            .strategy
            .issue(&principal, self.callbacks.as_ref())
            .await?;
        let mut session = issued.session;
        self.callbacks.session(&mut session);
        self.emit(AuthEvent::Session {
            principal_id: principal.id.clone(),
            refreshed: true,
            occurred_at: Utc::now(),
        })
        .await;
        Ok(SignInOutcome {
            session,
            session_cookie: issued.cookie_value,
            remember_cookie: None,
        })
    }

    pub async fn sign_out(&self, ctx: &RequestContext) -> FlowResult<()> {
        self.verify_csrf(ctx).await?;

        let principal_id = match &ctx.session_token {
            Some(token) => self
                .strategy
                .resolve(token, self.callbacks.as_ref())
                .await?
                .map(|resolved| resolved.principal.id),
            None => None,
        };

        if let Some(token) = &ctx.session_token {
            self.strategy.invalidate(token).await?;
        }
        if let Some(remember_token) = &ctx.remember_token {
            self.remember
                .revoke(remember_token)
                .await
                .map_err(FlowError::internal)?;
        }

        self.emit(AuthEvent::SignOut {
            principal_id,
            occurred_at: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn emit(&self, event: AuthEvent) {
        if let Err(err) = self.listener.publish(&event).await {
            warn!(?err, "failed to publish auth event");
        }
    }
}

pub struct AuthManagerBuilder {
    providers: ProviderRegistry,
    strategy: SessionStrategy,
    csrf: CsrfGuard,
    session_store: Arc<dyn SessionStore>,
    remember: Option<RememberTokens>,
    remember_ttl_seconds: i64,
    accounts: Arc<dyn AccountStore>,
    callbacks: Arc<dyn AuthCallbacks>,
    listener: Arc<dyn AuthEventListener>,
}

impl AuthManagerBuilder {
    fn new(strategy: SessionStrategy) -> Self {
        Self {
            providers: ProviderRegistry::new(),
            strategy,
            csrf: CsrfGuard::new(true),
            session_store: Arc::new(InMemorySessionStore::new()),
            remember: None,
            remember_ttl_seconds: 60 * 60 * 24 * 30,
            accounts: Arc::new(InMemoryAccountStore::new()),
            callbacks: Arc::new(DefaultCallbacks),
            listener: Arc::new(NullEventListener),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> anyhow::Result<Self> {
        self.providers.register(provider)?;
        Ok(self)
    }

    pub fn with_csrf(mut self, enabled: bool) -> Self {
        self.csrf = CsrfGuard::new(enabled);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    pub fn with_remember_tokens(mut self, remember: RememberTokens) -> Self {
        self.remember = Some(remember);
        self
    }

    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    pub fn with_account_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.accounts = store;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn AuthCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn AuthEventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn build(self) -> AuthManager {
        let remember = self.remember.unwrap_or_else(|| {
            RememberTokens::new(
                Arc::new(InMemoryRememberTokenStore::new()),
                self.remember_ttl_seconds,
            )
        });
        AuthManager {
            providers: self.providers,
            strategy: self.strategy,
            csrf: self.csrf,
            session_store: self.session_store,
            remember,
            accounts: self.accounts,
            callbacks: self.callbacks,
            listener: self.listener,
        }
    }
}
