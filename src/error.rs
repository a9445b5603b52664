use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::delivery::SendError;

#[derive(Debug)]
pub enum Error {
    // Auth
    LoginFail,

    // Send path
    BadRequest(String),
    NotFound(String),
    StoreUnavailable(String),

    // Generic
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Error::LoginFail => (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            ),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::StoreUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message
            }
        }));

        (status, body).into_response()
    }
}

// Allow conversion from other errors (e.g., anyhow, sqlx) easiest via string
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        match err {
            SendError::InvalidRequest(msg) => Error::BadRequest(msg),
            SendError::ProfileNotFound(msg) => Error::NotFound(msg),
            SendError::StoreUnavailable(msg) => Error::StoreUnavailable(msg),
        }
    }
}
