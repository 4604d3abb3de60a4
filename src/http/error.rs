use std::fmt::Display;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use serde_repr::*;
use tracing::{error, warn};

use crate::worker::{WorkerError, network::NetworkError};

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("{0}")]
    Any(#[from] anyhow::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("worker did not acknowledge the files")]
    NotAcknowledged,
    #[error("{0} is not served by this host")]
    Misdirected(String),
    #[error("{0}")]
    Worker(#[from] WorkerError),
    #[error("{0}")]
    Network(#[from] NetworkError),
}

#[derive(Serialize_repr, Deserialize_repr, PartialEq, Debug)]
#[repr(u16)]
pub enum ErrorCode {
    Normal = 200,
    InternalError = 1000,
    BadRequest = 1001,
    NotAcknowledged = 1002,
    BadGateway = 1003,
    Misdirected = 1004,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ErrorCode::*;

        let res = match self {
            Normal => "",
            InternalError => "internal server error",
            BadRequest => "bad request",
            NotAcknowledged => "cache was not updated",
            BadGateway => "network request failed",
            Misdirected => "misdirected request",
        };
        f.write_str(res)?;
        Ok(())
    }
}

/// Log and return INTERNAL_SERVER_ERROR
fn log_internal_error<T: Display>(err: T) -> (StatusCode, ErrorCode, String) {
    use ErrorCode::*;

    error!("{err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        InternalError,
        "internal server error".to_string(),
    )
}

// Tell axum how to convert `RouteError` into a response.
impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        use RouteError::*;

        let (status_code, code, err_message) = match self {
            Any(err) => log_internal_error(err),
            Worker(err) => log_internal_error(err),
            BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorCode::BadRequest, msg),
            NotAcknowledged => {
                error!("Worker did not acknowledge the files");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::NotAcknowledged,
                    "worker did not acknowledge the files".to_string(),
                )
            }
            Misdirected(url) => (
                StatusCode::MISDIRECTED_REQUEST,
                ErrorCode::Misdirected,
                format!("{url} is not served by this host"),
            ),
            Network(err) => {
                warn!("{err}");
                (StatusCode::BAD_GATEWAY, ErrorCode::BadGateway, err.to_string())
            }
        };
        let body = Json(json!({
            "code": code,
            "message": code.to_string(),
            "error": err_message
        }));
        (status_code, body).into_response()
    }
}

pub type RouteResult<T, E = RouteError> = Result<T, E>;
