use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::services::api_client::{ApiCallError, ErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Carries a machine-readable code such as `missing_authorization`.
    #[error("{0}")]
    Unauthorized(String),

    #[error("Parse error: {message}")]
    Parse { message: String, snippet: String },

    #[error("{0}")]
    Network(ApiCallError),

    #[error("{0}")]
    RateLimited(ApiCallError),

    #[error("{0}")]
    Server(ApiCallError),

    #[error("{0}")]
    Client(ApiCallError),

    #[error("Task not found or expired: {0}")]
    TaskNotFound(String),

    #[error("Task access forbidden: {0}")]
    TaskForbidden(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ApiCallError> for Error {
    fn from(err: ApiCallError) -> Self {
        match err.kind {
            ErrorKind::Timeout | ErrorKind::Connection => Error::Network(err),
            ErrorKind::RateLimited => Error::RateLimited(err),
            ErrorKind::Server(_) | ErrorKind::Decode => Error::Server(err),
            ErrorKind::Auth(_) | ErrorKind::Client(_) => Error::Client(err),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Error::BadRequest(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::TaskForbidden(_) => StatusCode::FORBIDDEN,
            Error::TaskNotFound(_) => StatusCode::NOT_FOUND,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Network(_) | Error::Server(_) | Error::Client(_) => StatusCode::BAD_GATEWAY,
            Error::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_message = match self {
            Error::Config(_) | Error::Internal(_) => {
                tracing::error!(error = %self, "internal error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
