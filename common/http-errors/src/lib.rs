use axum::{http::{StatusCode, HeaderValue}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub ability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    ForbiddenAbility { code: &'static str, ability: String, trace_id: Option<Uuid> },
    Forbidden { code: &'static str, trace_id: Option<Uuid> },
    MethodNotAllowed { trace_id: Option<Uuid> },
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Internal { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn unauthorized(code: &'static str) -> Self { Self::Unauthorized { code, trace_id: None, message: None } }
    pub fn forbidden(code: &'static str) -> Self { Self::Forbidden { code, trace_id: None } }
    pub fn bad_request(code: &'static str) -> Self { Self::BadRequest { code, trace_id: None, message: None } }
    pub fn not_found(code: &'static str) -> Self { Self::NotFound { code, trace_id: None } }
    pub fn internal<E: std::fmt::Display>(code: &'static str, e: E) -> Self {
        Self::Internal { code, trace_id: None, message: Some(e.to_string()) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, error_code) = match self {
            ApiError::Unauthorized { code, trace_id, message } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody { error: code.into(), ability: None, trace_id, message },
                code,
            ),
            ApiError::ForbiddenAbility { code, ability, trace_id } => (
                StatusCode::FORBIDDEN,
                ErrorBody { error: code.into(), ability: Some(ability), trace_id, message: None },
                code,
            ),
            ApiError::Forbidden { code, trace_id } => (
                StatusCode::FORBIDDEN,
                ErrorBody { error: code.into(), ability: None, trace_id, message: None },
                code,
            ),
            ApiError::MethodNotAllowed { trace_id } => (
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorBody { error: "method_not_allowed".into(), ability: None, trace_id, message: None },
                "method_not_allowed",
            ),
            ApiError::BadRequest { code, trace_id, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody { error: code.into(), ability: None, trace_id, message },
                code,
            ),
            ApiError::NotFound { code, trace_id } => (
                StatusCode::NOT_FOUND,
                ErrorBody { error: code.into(), ability: None, trace_id, message: None },
                code,
            ),
            ApiError::Internal { code, trace_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody { error: code.into(), ability: None, trace_id, message },
                code,
            ),
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
