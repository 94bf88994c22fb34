use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is not a valid compact JWS")]
    InvalidFormat,
    #[error("token carries no kid and several keys are registered")]
    MissingKeyId,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("no inline keys and no JWKS endpoint configured")]
    NoKeysConfigured,
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("JWKS document contained no usable key for this token")]
    JwksMissingKeys,
    #[error("failed to parse decoding key for kid '{0}': {1}")]
    KeyParse(String, String),
    #[error("token signature rejected")]
    SignatureVerification,
    #[error("issuer claim does not match the expected issuer")]
    IssuerMismatch,
    #[error("audience claim does not match the expected audience")]
    AudienceMismatch,
    #[error("required claim '{0}' is missing")]
    MissingClaim(String),
    #[error("token has expired")]
    TokenExpired,
    #[error("token is not yet valid")]
    TokenNotYetValid,
    #[error("signing secret is empty")]
    MissingJwtSecret,
    #[error("failed to sign claims: {0}")]
    Signing(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("principal id must not be empty")]
    EmptyPrincipalId,
}

impl AuthError {
    /// Stable machine-readable code carried in HTTP error bodies and asserted
    /// verbatim by tests.
    pub fn code(&self) -> String {
        match self {
            AuthError::InvalidFormat => "invalid_format".to_string(),
            AuthError::MissingKeyId => "missing_key_id".to_string(),
            AuthError::UnknownKeyId(_) => "unknown_key_id".to_string(),
            AuthError::NoKeysConfigured => "no_keys_configured".to_string(),
            AuthError::JwksFetch(_) => "jwks_fetch_failed".to_string(),
            AuthError::JwksMissingKeys => "jwks_missing_keys".to_string(),
            AuthError::KeyParse(_, _) => "key_parse_failed".to_string(),
            AuthError::SignatureVerification => "signature_verification_failed".to_string(),
            AuthError::IssuerMismatch => "issuer_mismatch".to_string(),
            AuthError::AudienceMismatch => "audience_mismatch".to_string(),
            AuthError::MissingClaim(name) => format!("missing_claim_{name}"),
            AuthError::TokenExpired => "token_expired".to_string(),
            AuthError::TokenNotYetValid => "token_not_yet_valid".to_string(),
            AuthError::MissingJwtSecret => "missing_jwt_secret".to_string(),
            AuthError::Signing(_) => "signing_failed".to_string(),
            AuthError::InvalidClaim(_, _) => "invalid_claim".to_string(),
            AuthError::EmptyPrincipalId => "empty_principal_id".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::NoKeysConfigured
            | AuthError::JwksFetch(_)
            | AuthError::JwksMissingKeys
            | AuthError::KeyParse(_, _)
            | AuthError::MissingJwtSecret
            | AuthError::Signing(_)
            | AuthError::EmptyPrincipalId => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
