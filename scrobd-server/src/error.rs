//! Error types for scrobd-server
//!
//! Module-specific error type plus the mapping from workspace errors to HTTP
//! responses used by every handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main error type for the scrobd-server module
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbling up from the shared library
    #[error(transparent)]
    Common(#[from] scrobd_common::Error),

    /// Malformed webhook payload
    #[error("Bad payload: {0}")]
    BadPayload(String),

    /// Import source file problems (missing, unreadable, wrong format)
    #[error("Import source error: {0}")]
    ImportSource(String),

    /// Remote history API errors
    #[error("Remote fetch error: {0}")]
    RemoteFetch(String),
}

/// Convenience Result type using scrobd-server Error
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP error response shared by all endpoints
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Json<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

impl Error {
    /// Map to an HTTP response: identity problems are the client's fault,
    /// everything structural is ours.
    pub fn into_api(self) -> ApiError {
        let status = match &self {
            Error::Common(scrobd_common::Error::MissingIdentity(_))
            | Error::Common(scrobd_common::Error::InvalidInput(_))
            | Error::BadPayload(_) => StatusCode::BAD_REQUEST,
            Error::Common(scrobd_common::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Common(scrobd_common::Error::UndoLogCorrupt(_)) => StatusCode::CONFLICT,
            Error::ImportSource(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            body: Json(json!({ "status": format!("error: {}", self) })),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        err.into_api()
    }
}

impl From<scrobd_common::Error> for ApiError {
    fn from(err: scrobd_common::Error) -> Self {
        Error::Common(err).into_api()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_is_client_error() {
        let err = Error::Common(scrobd_common::Error::MissingIdentity("no artist".into()));
        assert_eq!(err.into_api().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn corrupt_undo_log_is_conflict() {
        let err = Error::Common(scrobd_common::Error::UndoLogCorrupt("job".into()));
        assert_eq!(err.into_api().status, StatusCode::CONFLICT);
    }

    #[test]
    fn common_errors_convert_for_question_mark() {
        let api: ApiError = scrobd_common::Error::NotFound("scrobble x".into()).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
    }
}
