use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use common_gate::RbacAbility;
use jsonwebtoken::Algorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Lax,
    Strict,
    None,
}

impl CookieSameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieSameSite::Lax => "Lax",
            CookieSameSite::Strict => "Strict",
            CookieSameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Cookie,
    Jwt,
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub algorithms: Vec<Algorithm>,
    pub jwks_uri: Option<String>,
    pub clock_skew_seconds: u32,
    pub jwks_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub session_strategy: StrategyKind,
    pub session_cookie_name: String,
    pub jwt_cookie_name: String,
    pub anon_cookie_name: String,
    pub remember_cookie_name: String,
    pub cookie_secure: bool,
    pub cookie_same_site: CookieSameSite,
    pub cookie_domain: Option<String>,
    pub csrf_enabled: bool,
    pub session_ttl_seconds: i64,
    pub session_update_age_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub jwt: JwtSettings,
    pub gate_abilities: Vec<(String, RbacAbility)>,
}

impl ServiceConfig {
    /// Name of the cookie the active strategy writes its session into.
    pub fn active_session_cookie(&self) -> &str {
        match self.session_strategy {
            StrategyKind::Cookie => &self.session_cookie_name,
            StrategyKind::Jwt => &self.jwt_cookie_name,
        }
    }
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let session_strategy = env::var("AUTH_SESSION_STRATEGY")
        .ok()
        .map(|value| parse_strategy(&value))
        .transpose()
        .context("Failed to parse AUTH_SESSION_STRATEGY")?
        .unwrap_or(StrategyKind::Cookie);

    let session_cookie_name =
        env::var("AUTH_SESSION_COOKIE_NAME").unwrap_or_else(|_| "auth_session".to_string());
    let jwt_cookie_name =
        env::var("AUTH_JWT_COOKIE_NAME").unwrap_or_else(|_| "auth_token".to_string());
    let anon_cookie_name =
        env::var("AUTH_ANON_COOKIE_NAME").unwrap_or_else(|_| "auth_anon".to_string());
    let remember_cookie_name =
        env::var("AUTH_REMEMBER_COOKIE_NAME").unwrap_or_else(|_| "auth_remember".to_string());

    let cookie_secure = bool_from_env("AUTH_COOKIE_SECURE").unwrap_or(false);
    let cookie_same_site = env::var("AUTH_COOKIE_SAMESITE")
        .ok()
        .map(|value| parse_same_site(&value))
        .transpose()
        .context("Failed to parse AUTH_COOKIE_SAMESITE")?
        .unwrap_or(CookieSameSite::Lax);
    let cookie_domain = env::var("AUTH_COOKIE_DOMAIN")
        .ok()
        .and_then(|value| normalize_optional(&value));

    let csrf_enabled = bool_from_env("AUTH_CSRF_ENABLED").unwrap_or(true);

    let session_ttl_seconds = i64_from_env("AUTH_SESSION_TTL_SECONDS")?
        .unwrap_or(60 * 60 * 24 * 30);
    let session_update_age_seconds = i64_from_env("AUTH_SESSION_UPDATE_AGE_SECONDS")?
        .unwrap_or(60 * 60 * 24);
    let remember_ttl_seconds =
        i64_from_env("AUTH_REMEMBER_TTL_SECONDS")?.unwrap_or(60 * 60 * 24 * 90);

    let jwt = JwtSettings {
        secret: env::var("AUTH_JWT_SECRET")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        issuer: env::var("AUTH_JWT_ISSUER")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        audience: env::var("AUTH_JWT_AUDIENCE")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        algorithms: env::var("AUTH_JWT_ALGORITHMS")
            .ok()
            .map(|value| parse_algorithms(&value))
            .transpose()
            .context("Failed to parse AUTH_JWT_ALGORITHMS")?
            .unwrap_or_else(|| vec![Algorithm::HS256, Algorithm::RS256]),
        jwks_uri: env::var("AUTH_JWKS_URI")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        clock_skew_seconds: u32_from_env("AUTH_JWT_CLOCK_SKEW_SECONDS")?.unwrap_or(30),
        jwks_cache_ttl_seconds: u64_from_env("AUTH_JWKS_CACHE_TTL_SECONDS")?.unwrap_or(300),
    };

    let gate_abilities = env::var("AUTH_GATE_ABILITIES")
        .ok()
        .map(|value| parse_gate_abilities(&value))
        .transpose()
        .context("Failed to parse AUTH_GATE_ABILITIES")?
        .unwrap_or_default();

    Ok(ServiceConfig {
        session_strategy,
        session_cookie_name,
        jwt_cookie_name,
        anon_cookie_name,
        remember_cookie_name,
        cookie_secure,
        cookie_same_site,
        cookie_domain,
        csrf_enabled,
        session_ttl_seconds,
        session_update_age_seconds,
        remember_ttl_seconds,
        jwt,
        gate_abilities,
    })
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn i64_from_env(key: &str) -> Result<Option<i64>> {
    env::var(key)
        .ok()
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|err| anyhow!("Invalid {key} '{value}': {err}"))
        })
        .transpose()
}

fn u32_from_env(key: &str) -> Result<Option<u32>> {
    env::var(key)
        .ok()
        .map(|value| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|err| anyhow!("Invalid {key} '{value}': {err}"))
        })
        .transpose()
}

fn u64_from_env(key: &str) -> Result<Option<u64>> {
    env::var(key)
        .ok()
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|err| anyhow!("Invalid {key} '{value}': {err}"))
        })
        .transpose()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_same_site(value: &str) -> Result<CookieSameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(CookieSameSite::Lax),
        "strict" => Ok(CookieSameSite::Strict),
        "none" => Ok(CookieSameSite::None),
        other => Err(anyhow!(
            "Unsupported cookie same-site policy '{other}'. Use Lax, Strict, or None."
        )),
    }
}

fn parse_strategy(value: &str) -> Result<StrategyKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "cookie" | "session" => Ok(StrategyKind::Cookie),
        "jwt" => Ok(StrategyKind::Jwt),
        other => Err(anyhow!(
            "Unsupported session strategy '{other}'. Use cookie or jwt."
        )),
    }
}

fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>> {
    let mut algorithms = Vec::new();
    for item in value.split(',') {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let algorithm = Algorithm::from_str(trimmed)
            .map_err(|_| anyhow!("Unsupported JWT algorithm '{trimmed}'"))?;
        algorithms.push(algorithm);
    }
    if algorithms.is_empty() {
        return Err(anyhow!("AUTH_JWT_ALGORITHMS resolved to an empty list"));
    }
    Ok(algorithms)
}

/// Declarative boot-time abilities: `name=role|role` entries separated by
/// `;`, with an optional `all:` / `any:` prefix on the role list.
fn parse_gate_abilities(value: &str) -> Result<Vec<(String, RbacAbility)>> {
    let mut abilities = Vec::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, spec) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Ability entry '{entry}' is missing '='"))?;
        let (mode, roles_spec) = match spec.split_once(':') {
            Some(("any", rest)) => ("any", rest),
            Some(("all", rest)) => ("all", rest),
            Some((other, _)) => {
                return Err(anyhow!(
                    "Unsupported ability match mode '{other}' in '{entry}'"
                ))
            }
            None => ("any", spec),
        };
        let roles = roles_spec
            .split('|')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if roles.is_empty() {
            return Err(anyhow!("Ability '{name}' has no roles"));
        }
        let ability = if mode == "all" {
            RbacAbility::all(roles)
        } else {
            RbacAbility::any(roles)
        };
        abilities.push((name.trim().to_string(), ability));
    }
    Ok(abilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_gate::MatchMode;

    #[test]
    fn parse_same_site_rejects_unknown_values() {
        assert!(parse_same_site("lax").is_ok());
        assert!(parse_same_site("Strict").is_ok());
        assert!(parse_same_site("sideways").is_err());
    }

    #[test]
    fn parse_strategy_accepts_both_kinds() {
        assert_eq!(parse_strategy("cookie").unwrap(), StrategyKind::Cookie);
        assert_eq!(parse_strategy("JWT").unwrap(), StrategyKind::Jwt);
        assert!(parse_strategy("macaroon").is_err());
    }

    #[test]
    fn parse_algorithms_rejects_unknown_names() {
        let algorithms = parse_algorithms("HS256, RS256").unwrap();
        assert_eq!(algorithms, vec![Algorithm::HS256, Algorithm::RS256]);
        assert!(parse_algorithms("ROT13").is_err());
    }

    #[test]
    fn parse_gate_abilities_supports_modes() {
        let abilities =
            parse_gate_abilities("reports.view=admin|manager;audit.export=all:admin|security")
                .unwrap();
        assert_eq!(abilities.len(), 2);
        assert_eq!(abilities[0].0, "reports.view");
        assert_eq!(abilities[0].1.match_mode, MatchMode::Any);
        assert_eq!(abilities[1].1.match_mode, MatchMode::All);
        assert_eq!(abilities[1].1.roles, vec!["admin", "security"]);

        assert!(parse_gate_abilities("broken").is_err());
        assert!(parse_gate_abilities("x=maybe:admin").is_err());
        assert!(parse_gate_abilities("x=").is_err());
    }
}
