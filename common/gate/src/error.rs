use common_http_errors::ApiError;
use thiserror::Error;

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("ability '{0}' is already registered")]
    DuplicateAbility(String),
    #[error("ability '{ability}' denied")]
    Denied {
        ability: String,
        /// Id of the principal the check ran against, if any.
        principal: Option<String>,
    },
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::DuplicateAbility(_) => "duplicate_ability",
            GateError::Denied { .. } => "access_denied",
        }
    }
}

impl From<GateError> for ApiError {
    fn from(value: GateError) -> Self {
        match value {
            GateError::Denied { ability, .. } => ApiError::ForbiddenAbility {
                code: "access_denied",
                ability,
                trace_id: None,
            },
            err @ GateError::DuplicateAbility(_) => {
                ApiError::internal("duplicate_ability", err)
            }
        }
    }
}
