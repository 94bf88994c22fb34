use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common_auth::AuthCredentials;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::app::AppState;
use crate::config::ServiceConfig;
use crate::error::{FlowError, FlowResult};
use crate::manager::{RequestContext, SignInOutcome, SignInResponse};
use crate::providers::ProviderKind;

const CSRF_HEADER: &str = "x-csrf-token";

pub fn auth_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/auth/csrf", get(csrf_token))
        .route("/auth/providers", get(providers_index))
        .route("/auth/signin/:provider", post(sign_in).get(sign_in_redirect))
        .route(
            "/auth/register/:provider",
            post(register).get(sign_in_redirect),
        )
        .route("/auth/callback/:provider", get(callback))
        .route("/auth/session", get(session))
        .route("/auth/signout", post(sign_out))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "unable to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn csrf_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> FlowResult<Response> {
    let existing = cookie_value(&headers, &state.config.anon_cookie_name);
    let (session_id, created, token) = state.manager.issue_csrf(existing.as_deref()).await?;

    let mut response = Json(json!({ "csrfToken": token })).into_response();
    if created {
        append_cookie(
            &mut response,
            build_cookie(&state.config.anon_cookie_name, &session_id, None, &state.config),
        )?;
    }
    Ok(response)
}

async fn providers_index(State(state): State<AppState>) -> Response {
    Json(json!({ "providers": state.manager.providers().describe() })).into_response()
}

#[derive(Deserialize)]
struct SignInBody {
    #[serde(flatten)]
    credentials: AuthCredentials,
    #[serde(default)]
    remember: bool,
    csrf_token: Option<String>,
}

async fn sign_in(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignInBody>,
) -> FlowResult<Response> {
    let ctx = request_context(&headers, &state.config, body.csrf_token.clone(), body.remember);
    match state.manager.sign_in(&provider, &body.credentials, &ctx).await {
        Ok(SignInResponse::Session(outcome)) => {
            state.metrics.login_attempt("success");
            state
                .metrics
                .session_issued(state.manager.strategy_name());
            session_response(outcome, None, &state.config)
        }
        Ok(SignInResponse::VerificationSent { identifier }) => Ok(Json(json!({
            "verification": "sent",
            "identifier": identifier,
        }))
        .into_response()),
        Err(err) => {
            if matches!(
                err,
                FlowError::InvalidCredentials | FlowError::AccessDenied { .. }
            ) {
                state.metrics.login_attempt("failure");
            }
            Err(err)
        }
    }
}

async fn register(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignInBody>,
) -> FlowResult<Response> {
    let ctx = request_context(&headers, &state.config, body.csrf_token.clone(), body.remember);
    let outcome = state
        .manager
        .register(&provider, &body.credentials, &ctx)
        .await?;
    state.metrics.login_attempt("success");
    state
        .metrics
        .session_issued(state.manager.strategy_name());
    session_response(outcome, None, &state.config)
}

#[derive(Deserialize)]
struct RedirectQuery {
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
}

/// GET on a sign-in route: OAuth providers redirect to the authorization
/// endpoint; credential-style providers answer 405.
async fn sign_in_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
) -> FlowResult<Response> {
    match state.manager.provider_kind(&provider) {
        Some(ProviderKind::Oauth) => {
            let existing = cookie_value(&headers, &state.config.anon_cookie_name);
            let (session_id, created) =
                state.manager.ensure_anon_session(existing.as_deref()).await?;
            let callback_url = sanitize_callback_url(query.callback_url.as_deref());
            let url = state
                .manager
                .authorization_url(&provider, &session_id, callback_url)?;

            let mut response = Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, url)
                .body(Body::empty())
                .map_err(FlowError::internal)?;
            if created {
                append_cookie(
                    &mut response,
                    build_cookie(
                        &state.config.anon_cookie_name,
                        &session_id,
                        None,
                        &state.config,
                    ),
                )?;
            }
            Ok(response)
        }
        Some(_) => Err(FlowError::UnsupportedOperation(provider)),
        None => Err(FlowError::UnknownProvider(provider)),
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    token: Option<String>,
    email: Option<String>,
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> FlowResult<Response> {
    let ctx = request_context(&headers, &state.config, None, false);
    match state.manager.provider_kind(&provider) {
        Some(ProviderKind::Oauth) => {
            let code = query
                .code
                .as_deref()
                .ok_or(FlowError::MissingParameter("code"))?;
            let oauth_state = query
                .state
                .as_deref()
                .ok_or(FlowError::MissingParameter("state"))?;
            let (outcome, callback_url) = state
                .manager
                .handle_oauth_callback(&provider, code, oauth_state, &ctx)
                .await?;
            state.metrics.login_attempt("success");
            state
                .metrics
                .session_issued(state.manager.strategy_name());
            session_response(outcome, callback_url, &state.config)
        }
        Some(ProviderKind::Email) => {
            let token = query
                .token
                .as_deref()
                .ok_or(FlowError::MissingParameter("token"))?;
            let email = query
                .email
                .as_deref()
                .ok_or(FlowError::MissingParameter("email"))?;
            let outcome = state
                .manager
                .handle_email_callback(&provider, email, token, &ctx)
                .await?;
            state.metrics.login_attempt("success");
            state
                .metrics
                .session_issued(state.manager.strategy_name());
            let callback_url = sanitize_callback_url(query.callback_url.as_deref())
                .map(ToString::to_string);
            session_response(outcome, callback_url, &state.config)
        }
        Some(ProviderKind::Credentials) => Err(FlowError::UnsupportedOperation(provider)),
        None => Err(FlowError::UnknownProvider(provider)),
    }
}

async fn session(State(state): State<AppState>, headers: HeaderMap) -> FlowResult<Response> {
    let ctx = request_context(&headers, &state.config, None, false);
    let resolution = state.manager.resolve_session(&ctx).await?;

    match resolution.session {
        Some(session) => {
            let mut response = Json(json!({
                "user": session.user,
                "strategy": session.strategy,
                "expires_at": session.expires_at,
            }))
            .into_response();
            if let Some(value) = resolution.set_session_cookie {
                append_cookie(
                    &mut response,
                    build_cookie(
                        state.config.active_session_cookie(),
                        &value,
                        Some(state.config.session_ttl_seconds),
                        &state.config,
                    ),
                )?;
            }
            if let Some(value) = resolution.set_remember_cookie {
                append_cookie(
                    &mut response,
                    build_cookie(
                        &state.config.remember_cookie_name,
                        &value,
                        Some(state.config.remember_ttl_seconds),
                        &state.config,
                    ),
                )?;
            }
            Ok(response)
        }
        None => {
            let mut response = FlowError::Unauthenticated.into_response();
            if resolution.clear_remember {
                append_cookie(
                    &mut response,
                    clear_cookie(&state.config.remember_cookie_name, &state.config),
                )?;
                response.headers_mut().insert(
                    WWW_AUTHENTICATE,
                    HeaderValue::from_static("Session realm=\"auth\""),
                );
            }
            Ok(response)
        }
    }
}

#[derive(Deserialize, Default)]
struct SignOutBody {
    csrf_token: Option<String>,
}

async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<SignOutBody>>,
) -> FlowResult<Response> {
    let csrf_token = body.and_then(|Json(body)| body.csrf_token);
    let ctx = request_context(&headers, &state.config, csrf_token, false);
    state.manager.sign_out(&ctx).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookie(
        &mut response,
        clear_cookie(state.config.active_session_cookie(), &state.config),
    )?;
    append_cookie(
        &mut response,
        clear_cookie(&state.config.remember_cookie_name, &state.config),
    )?;
    Ok(response)
}

fn session_response(
    outcome: SignInOutcome,
    redirect: Option<String>,
    config: &ServiceConfig,
) -> FlowResult<Response> {
    let mut response = match redirect {
        Some(target) => Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, target)
            .body(Body::empty())
            .map_err(FlowError::internal)?,
        None => Json(json!({
            "user": outcome.session.user,
            "strategy": outcome.session.strategy,
        }))
        .into_response(),
    };

    append_cookie(
        &mut response,
        build_cookie(
            config.active_session_cookie(),
            &outcome.session_cookie,
            Some(config.session_ttl_seconds),
            config,
        ),
    )?;
    if let Some(value) = outcome.remember_cookie {
        append_cookie(
            &mut response,
            build_cookie(
                &config.remember_cookie_name,
                &value,
                Some(config.remember_ttl_seconds),
                config,
            ),
        )?;
    }
    Ok(response)
}

/// Only same-origin paths survive; external absolute URLs are dropped.
fn sanitize_callback_url(raw: Option<&str>) -> Option<&str> {
    raw.filter(|url| url.starts_with('/') && !url.starts_with("//"))
}

pub(crate) fn request_context(
    headers: &HeaderMap,
    config: &ServiceConfig,
    csrf_token: Option<String>,
    remember: bool,
) -> RequestContext {
    let csrf_token = csrf_token.or_else(|| {
        headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    });
    RequestContext {
        session_token: cookie_value(headers, config.active_session_cookie()),
        anon_session_id: cookie_value(headers, &config.anon_cookie_name),
        csrf_token,
        remember_token: cookie_value(headers, &config.remember_cookie_name),
        remember,
    }
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get_all(COOKIE).iter().find_map(|header| {
        let cookies = header.to_str().ok()?;
        cookies.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    })
}

fn build_cookie(
    name: &str,
    value: &str,
    max_age: Option<i64>,
    config: &ServiceConfig,
) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite={}",
        config.cookie_same_site.as_str()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.cookie_domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if let Some(age) = max_age {
        cookie.push_str("; Max-Age=");
        cookie.push_str(&age.to_string());
    }
    cookie
}

fn clear_cookie(name: &str, config: &ServiceConfig) -> String {
    build_cookie(name, "", Some(0), config)
}

fn append_cookie(response: &mut Response, cookie: String) -> FlowResult<()> {
    let value = HeaderValue::from_str(&cookie).map_err(FlowError::internal)?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_urls_sanitize_to_same_origin_paths() {
        assert_eq!(sanitize_callback_url(Some("/dashboard")), Some("/dashboard"));
        assert_eq!(sanitize_callback_url(Some("//evil.example.com")), None);
        assert_eq!(sanitize_callback_url(Some("https://evil.example.com")), None);
        assert_eq!(sanitize_callback_url(None), None);
    }

    #[test]
    fn cookie_header_parsing_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("a=1; auth_session=sid-123; b=2"),
        );
        assert_eq!(
            cookie_value(&headers, "auth_session"),
            Some("sid-123".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
