use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use common_auth::{JwtConfig, JwtIssuer, JwtVerifier};
use common_gate::GateRegistry;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use auth_service::config::{load_service_config, ServiceConfig, StrategyKind};
use auth_service::handlers::auth_router;
use auth_service::manager::AuthManager;
use auth_service::metrics::{AuthMetrics, GateMetricsObserver};
use auth_service::oauth::{ClientAuthMethod, OAuth2Client, OAuth2ClientConfig};
use auth_service::providers::{
    CredentialsProvider, EmailProvider, InMemoryCredentialsBackend,
    InMemoryVerificationTokenStore, OAuthProvider, OAuthProviderConfig, Provider, StateSigner,
};
use auth_service::providers::email::TracingVerificationSender;
use auth_service::session::{
    CookieSessionStrategy, InMemorySessionStore, JwtSessionStrategy, SessionStore, SessionStrategy,
};
use auth_service::tokens::random_token;
use auth_service::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,auth_service=debug".to_string()),
        )
        .init();

    let config = Arc::new(load_service_config()?);
    let metrics = Arc::new(AuthMetrics::new()?);

    let gate = Arc::new(GateRegistry::new());
    for (name, ability) in &config.gate_abilities {
        // Managed: config-declared abilities may be re-declared across
        // restarts and reloads without tripping the duplicate check.
        gate.register_role_ability_managed(name.clone(), ability.clone());
    }
    gate.observe(Arc::new(GateMetricsObserver::new(metrics.as_ref().clone())));

    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let strategy = build_strategy(&config, session_store.clone())?;

    let mut builder = AuthManager::builder(strategy)
        .with_csrf(config.csrf_enabled)
        .with_session_store(session_store)
        .with_remember_ttl_seconds(config.remember_ttl_seconds)
        .with_provider(Provider::Credentials(credentials_provider()?))?;

    if bool_env("AUTH_EMAIL_PROVIDER_ENABLED") {
        builder = builder.with_provider(Provider::Email(EmailProvider::new(
            "email",
            "Email",
            Arc::new(InMemoryVerificationTokenStore::new()),
            Arc::new(TracingVerificationSender),
            60 * 15,
        )))?;
    }
    if let Some(provider) = oauth_provider_from_env(&config)? {
        builder = builder.with_provider(Provider::OAuth(provider))?;
    }

    let manager = Arc::new(builder.build());
    let state = AppState {
        manager,
        gate,
        config: config.clone(),
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins()?))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ]);

    let app = auth_router(state).layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8087);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    info!(%addr, strategy = ?config.session_strategy, "starting auth-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_strategy(
    config: &ServiceConfig,
    session_store: Arc<dyn SessionStore>,
) -> Result<SessionStrategy> {
    match config.session_strategy {
        StrategyKind::Cookie => Ok(SessionStrategy::Cookie(CookieSessionStrategy::new(
            session_store,
            config.session_ttl_seconds,
            config.session_update_age_seconds,
        ))),
        StrategyKind::Jwt => {
            let secret = config
                .jwt
                .secret
                .as_deref()
                .context("AUTH_JWT_SECRET is required for the jwt session strategy (missing_jwt_secret)")?;
            let mut issuer = JwtIssuer::hs256(secret)?
                .with_ttl_seconds(config.session_ttl_seconds);
            if let Some(iss) = &config.jwt.issuer {
                issuer = issuer.with_issuer(iss.clone());
            }
            if let Some(aud) = &config.jwt.audience {
                issuer = issuer.with_audience(aud.clone());
            }

            let mut jwt_config = JwtConfig::new()
                .with_algorithms(config.jwt.algorithms.clone())
                .with_leeway(config.jwt.clock_skew_seconds);
            if let Some(iss) = &config.jwt.issuer {
                jwt_config = jwt_config.with_issuer(iss.clone());
            }
            if let Some(aud) = &config.jwt.audience {
                jwt_config = jwt_config.with_audience(aud.clone());
            }
            let mut verifier_builder =
                JwtVerifier::builder(jwt_config).with_secret("local", secret);
            if let Some(jwks_uri) = &config.jwt.jwks_uri {
                verifier_builder = verifier_builder.with_jwks_url(
                    jwks_uri.clone(),
                    Duration::from_secs(config.jwt.jwks_cache_ttl_seconds),
                );
            }

            Ok(SessionStrategy::Jwt(JwtSessionStrategy::new(
                issuer,
                verifier_builder.build(),
                config.session_update_age_seconds,
            )))
        }
    }
}

fn credentials_provider() -> Result<CredentialsProvider> {
    let allow_registration = bool_env("AUTH_ALLOW_REGISTRATION");
    let backend = InMemoryCredentialsBackend::new(allow_registration);
    if let (Ok(email), Ok(password)) = (env::var("AUTH_SEED_EMAIL"), env::var("AUTH_SEED_PASSWORD"))
    {
        let user = common_auth::AuthUser::new(format!("seed-{email}"))
            .map_err(|err| anyhow!("{err}"))?
            .with_email(&email)
            .with_roles(["admin"]);
        backend.add_user(user, &password)?;
        info!(email, "seeded credentials user");
    }
    Ok(CredentialsProvider::new(
        "credentials",
        "Password",
        Arc::new(backend),
    ))
}

fn oauth_provider_from_env(config: &ServiceConfig) -> Result<Option<OAuthProvider>> {
    let Ok(client_id) = env::var("AUTH_OAUTH_CLIENT_ID") else {
        return Ok(None);
    };
    let client_secret =
        env::var("AUTH_OAUTH_CLIENT_SECRET").context("AUTH_OAUTH_CLIENT_SECRET is required")?;
    let authorization_endpoint = env::var("AUTH_OAUTH_AUTHORIZATION_ENDPOINT")
        .context("AUTH_OAUTH_AUTHORIZATION_ENDPOINT is required")?;
    let token_endpoint =
        env::var("AUTH_OAUTH_TOKEN_ENDPOINT").context("AUTH_OAUTH_TOKEN_ENDPOINT is required")?;
    let userinfo_endpoint = env::var("AUTH_OAUTH_USERINFO_ENDPOINT")
        .context("AUTH_OAUTH_USERINFO_ENDPOINT is required")?;
    let redirect_uri =
        env::var("AUTH_OAUTH_REDIRECT_URI").context("AUTH_OAUTH_REDIRECT_URI is required")?;
    let scopes = env::var("AUTH_OAUTH_SCOPES")
        .unwrap_or_else(|_| "openid email profile".to_string())
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let client = OAuth2Client::new(OAuth2ClientConfig {
        client_id,
        client_secret,
        token_endpoint,
        introspection_endpoint: env::var("AUTH_OAUTH_INTROSPECTION_ENDPOINT").ok(),
        auth_method: ClientAuthMethod::Basic,
        introspection_cache_ttl: Duration::from_secs(config.jwt.jwks_cache_ttl_seconds),
        leeway_seconds: config.jwt.clock_skew_seconds,
    });

    let state_secret = env::var("AUTH_STATE_SECRET")
        .ok()
        .or_else(|| config.jwt.secret.clone())
        .unwrap_or_else(random_token);

    Ok(Some(OAuthProvider::new(
        OAuthProviderConfig {
            id: env::var("AUTH_OAUTH_PROVIDER_ID").unwrap_or_else(|_| "oauth".to_string()),
            name: env::var("AUTH_OAUTH_PROVIDER_NAME").unwrap_or_else(|_| "OAuth".to_string()),
            authorization_endpoint,
            userinfo_endpoint,
            redirect_uri,
            scopes,
        },
        client,
        Arc::new(auth_service::providers::oauth::OidcProfileMapper),
        StateSigner::new(&state_secret, 600),
    )))
}

fn allowed_origins() -> Result<Vec<HeaderValue>> {
    let raw = env::var("AUTH_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| anyhow!("Invalid CORS origin '{origin}'"))
        })
        .collect()
}

fn bool_env(key: &str) -> bool {
    env::var(key)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
