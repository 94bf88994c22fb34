mod support;

use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::http::header::{COOKIE, LOCATION};
use axum::http::{Request, StatusCode};
use httpmock::prelude::*;
use serde_json::json;
use tower::util::ServiceExt;
use url::Url;

use support::{body_json, build_app, mock_oauth_upstream, set_cookie_pair, TestApp, TestAppOptions};

fn oauth_app(server: &MockServer) -> TestApp {
    build_app(TestAppOptions {
        csrf_enabled: false,
        oauth_server_base: Some(server.base_url()),
        ..TestAppOptions::default()
    })
}

/// Drive the redirect and hand back (anon cookie pair, state parameter).
async fn start_authorization(
    app: &TestApp,
    callback_url: Option<&str>,
) -> Result<(String, String)> {
    let uri = match callback_url {
        Some(target) => format!("/auth/signin/acme?callbackUrl={target}"),
        None => "/auth/signin/acme".to_string(),
    };
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);

    let anon_cookie = set_cookie_pair(&response, "auth_anon")
        .ok_or_else(|| anyhow!("missing anonymous session cookie"))?;
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| anyhow!("missing redirect target"))?;
    let url = Url::parse(location)?;
    assert_eq!(url.path(), "/authorize");
    let query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    assert!(query
        .iter()
        .any(|(key, value)| key == "response_type" && value == "code"));
    assert!(query
        .iter()
        .any(|(key, value)| key == "client_id" && value == "client-1"));
    let state = query
        .iter()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.clone())
        .ok_or_else(|| anyhow!("missing state parameter"))?;
    Ok((anon_cookie, state))
}

#[tokio::test]
async fn full_authorization_code_flow_issues_a_session() -> Result<()> {
    let server = MockServer::start();
    mock_oauth_upstream(&server);
    let app = oauth_app(&server);

    let (anon_cookie, state) = start_authorization(&app, None).await?;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=code-1&state={state}"))
                .header(COOKIE, &anon_cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie_pair(&response, "auth_session").is_some());
    let body = body_json(response.into_body()).await;
    assert_eq!(body["user"]["id"], json!("acct-9"));
    assert_eq!(body["user"]["email"], json!("person@acme.test"));
    Ok(())
}

#[tokio::test]
async fn sanitized_callback_url_survives_the_round_trip() -> Result<()> {
    let server = MockServer::start();
    mock_oauth_upstream(&server);
    let app = oauth_app(&server);

    let (anon_cookie, state) = start_authorization(&app, Some("/dashboard")).await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=code-1&state={state}"))
                .header(COOKIE, &anon_cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok()),
        Some("/dashboard")
    );
    assert!(set_cookie_pair(&response, "auth_session").is_some());
    Ok(())
}

#[tokio::test]
async fn external_callback_urls_are_dropped() -> Result<()> {
    let server = MockServer::start();
    mock_oauth_upstream(&server);
    let app = oauth_app(&server);

    let (anon_cookie, state) =
        start_authorization(&app, Some("https://evil.example.com/phish")).await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=code-1&state={state}"))
                .header(COOKIE, &anon_cookie)
                .body(Body::empty())?,
        )
        .await?;
    // No redirect: the external URL never made it into the state.
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn tampered_state_is_rejected() -> Result<()> {
    let server = MockServer::start();
    mock_oauth_upstream(&server);
    let app = oauth_app(&server);

    let (anon_cookie, state) = start_authorization(&app, None).await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=code-1&state={state}x"))
                .header(COOKIE, &anon_cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"], json!("invalid_state"));
    Ok(())
}

#[tokio::test]
async fn state_bound_to_a_different_session_is_rejected() -> Result<()> {
    let server = MockServer::start();
    mock_oauth_upstream(&server);
    let app = oauth_app(&server);

    let (_anon_cookie, state) = start_authorization(&app, None).await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=code-1&state={state}"))
                .header(COOKIE, "auth_anon=another-session")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn failed_code_exchange_surfaces_the_upstream_status() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({ "error": "invalid_grant" }));
    });
    let app = oauth_app(&server);

    let (anon_cookie, state) = start_authorization(&app, None).await?;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/callback/acme?code=expired&state={state}"))
                .header(COOKIE, &anon_cookie)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"], json!("oauth_upstream_status"));
    Ok(())
}

#[tokio::test]
async fn post_sign_in_on_oauth_is_not_allowed() -> Result<()> {
    let server = MockServer::start();
    let app = oauth_app(&server);

    let post = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signin/acme")
                .header("content-type", "application/json")
                .body(Body::from(json!({}).to_string()))?,
        )
        .await?;
    assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}
