use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// A verified claim set. Only the verifier constructs one, so holding a
/// `JwtPayload` means the token's signature and validity window checked out.
#[derive(Debug, Clone)]
pub struct JwtPayload {
    pub subject: Option<String>,
    pub claims: Map<String, Value>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JwtPayload {
    pub(crate) fn from_verified(claims: Map<String, Value>) -> Self {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let issued_at = claims
            .get("iat")
            .and_then(claim_timestamp)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        let expires_at = claims
            .get("exp")
            .and_then(claim_timestamp)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        Self {
            subject,
            claims,
            issued_at,
            expires_at,
        }
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// The `roles` claim as a list of strings, tolerating a single string.
    pub fn roles(&self) -> Vec<String> {
        match self.claims.get("roles") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            Some(Value::String(role)) => vec![role.clone()],
            _ => Vec::new(),
        }
    }
}

/// Lenient numeric-timestamp coercion: JSON numbers (integral or float) and
/// numeric strings all decode; anything else is None.
pub fn claim_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(num) => num
            .as_i64()
            .or_else(|| num.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// True when an `aud` claim (string or array-of-strings) contains `expected`.
pub fn audience_matches(claim: &Value, expected: &str) -> bool {
    match claim {
        Value::String(aud) => aud == expected,
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|aud| aud == expected),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_coerce_leniently() {
        assert_eq!(claim_timestamp(&json!(1700000000)), Some(1700000000));
        assert_eq!(claim_timestamp(&json!(1700000000.7)), Some(1700000000));
        assert_eq!(claim_timestamp(&json!("1700000000")), Some(1700000000));
        assert_eq!(claim_timestamp(&json!(true)), None);
    }

    #[test]
    fn audience_accepts_string_or_array() {
        assert!(audience_matches(&json!("api"), "api"));
        assert!(audience_matches(&json!(["web", "api"]), "api"));
        assert!(!audience_matches(&json!(["web"]), "api"));
        assert!(!audience_matches(&json!(42), "api"));
    }

    #[test]
    fn payload_extracts_standard_fields() {
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("user-1"));
        claims.insert("iat".to_string(), json!(1700000000));
        claims.insert("exp".to_string(), json!("1700000600"));
        claims.insert("roles".to_string(), json!(["admin"]));

        let payload = JwtPayload::from_verified(claims);
        assert_eq!(payload.subject.as_deref(), Some("user-1"));
        assert_eq!(payload.roles(), vec!["admin".to_string()]);
        assert_eq!(
            payload.expires_at.map(|at| at.timestamp()),
            Some(1700000600)
        );
    }
}
