use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_auth::AuthError;
use common_gate::GateError;
use serde::Serialize;
use thiserror::Error;

use crate::oauth::OAuthError;

pub type FlowResult<T> = Result<T, FlowError>;

/// Errors surfaced by the sign-in / session flows. Each variant carries a
/// stable machine-readable code used verbatim in HTTP bodies and tests.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("CSRF token missing or mismatched")]
    InvalidCsrf,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("sign-in denied")]
    AccessDenied { reason: Option<String> },
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("provider '{0}' does not support this operation")]
    UnsupportedOperation(String),
    #[error("not authenticated")]
    Unauthenticated,
    #[error("invalid or expired verification token")]
    InvalidVerificationToken,
    #[error("oauth state parameter rejected")]
    InvalidState,
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("profile mapping failed: {0}")]
    ProfileMapping(String),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Jwt(#[from] AuthError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("{0}")]
    Internal(String),
}

impl FlowError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn code(&self) -> String {
        match self {
            FlowError::InvalidCsrf => "invalid_csrf".to_string(),
            FlowError::InvalidCredentials => "invalid_credentials".to_string(),
            FlowError::AccessDenied { .. } => "access_denied".to_string(),
            FlowError::UnknownProvider(_) => "unknown_provider".to_string(),
            FlowError::UnsupportedOperation(_) => "method_not_allowed".to_string(),
            FlowError::Unauthenticated => "unauthenticated".to_string(),
            FlowError::InvalidVerificationToken => "invalid_verification_token".to_string(),
            FlowError::InvalidState => "invalid_state".to_string(),
            FlowError::MissingParameter(name) => format!("missing_parameter_{name}"),
            FlowError::ProfileMapping(_) => "profile_mapping_failed".to_string(),
            FlowError::OAuth(err) => err.code().to_string(),
            FlowError::Jwt(err) => err.code(),
            FlowError::Gate(err) => err.code().to_string(),
            FlowError::Internal(_) => "internal_error".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            FlowError::InvalidCsrf => StatusCode::FORBIDDEN,
            FlowError::InvalidCredentials
            | FlowError::AccessDenied { .. }
            | FlowError::Unauthenticated
            | FlowError::InvalidVerificationToken
            | FlowError::InvalidState => StatusCode::UNAUTHORIZED,
            FlowError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            FlowError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            FlowError::UnsupportedOperation(_) => StatusCode::METHOD_NOT_ALLOWED,
            FlowError::ProfileMapping(_) => StatusCode::UNAUTHORIZED,
            // Upstream failures read as verification failures for this
            // request; they are logged, not retried.
            FlowError::OAuth(_) => StatusCode::UNAUTHORIZED,
            FlowError::Jwt(err) => match err {
                AuthError::MissingJwtSecret
                | AuthError::NoKeysConfigured
                | AuthError::KeyParse(_, _)
                | AuthError::Signing(_)
                | AuthError::JwksFetch(_)
                | AuthError::JwksMissingKeys
                | AuthError::EmptyPrincipalId => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            },
            FlowError::Gate(GateError::Denied { .. }) => StatusCode::FORBIDDEN,
            FlowError::Gate(_) | FlowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.code(),
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_mismatch_is_forbidden() {
        assert_eq!(FlowError::InvalidCsrf.status(), StatusCode::FORBIDDEN);
        assert_eq!(FlowError::InvalidCsrf.code(), "invalid_csrf");
    }

    #[test]
    fn unsupported_operation_is_405() {
        let err = FlowError::UnsupportedOperation("credentials".into());
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(err.code(), "method_not_allowed");
    }

    #[test]
    fn missing_secret_is_a_server_error() {
        let err = FlowError::from(AuthError::MissingJwtSecret);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "missing_jwt_secret");
    }
}
