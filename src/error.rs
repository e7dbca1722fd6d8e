use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::moodle::MoodleError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// Moodle answered, but not in a shape we can use.
    #[error("{0}")]
    BadGateway(String),
    #[error(transparent)]
    Gateway(#[from] MoodleError),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "bad_gateway"),
            ApiError::Gateway(MoodleError::MissingToken) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            ApiError::Gateway(MoodleError::Unreachable(_)) => {
                (StatusCode::BAD_GATEWAY, "gateway_unreachable")
            }
            ApiError::Gateway(MoodleError::Http { .. }) => {
                (StatusCode::BAD_GATEWAY, "gateway_http_error")
            }
            ApiError::Gateway(MoodleError::Application { .. }) => {
                (StatusCode::BAD_GATEWAY, "gateway_application_error")
            }
            ApiError::Gateway(MoodleError::Decode(_)) => (StatusCode::BAD_GATEWAY, "bad_gateway"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = error, "request failed");
        }
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
