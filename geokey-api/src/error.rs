//! HTTP mapping of the common error taxonomy
//!
//! Every handler returns `Result<_, ApiError>`. The conversion to JSON
//! follows the wire contract: `{error, error_description}` plus a per-field
//! `errors` object for validation failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use geokey_common::Error;

/// Handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Wrapper that turns a [`geokey_common::Error`] into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, description, field_errors) = match &self.0 {
            Error::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "validation_failed",
                "One or more fields did not validate.".to_string(),
                Some(fields.clone()),
            ),
            Error::MalformedRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "malformed_request",
                msg.clone(),
                None,
            ),
            Error::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone(), None)
            }
            Error::PermissionDenied(msg) => (
                StatusCode::FORBIDDEN,
                "permission_denied",
                msg.clone(),
                None,
            ),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Error::Database(e) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "A database error occurred.".to_string(),
                    None,
                )
            }
            Error::Io(e) => {
                error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An I/O error occurred.".to_string(),
                    None,
                )
            }
            Error::Config(msg) | Error::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred.".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": error,
            "error_description": description,
        });
        if let Some(fields) = field_errors {
            body["errors"] = json!(fields);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_field_list() {
        let err = ApiError(Error::validation("number", "Not a number."));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError(Error::NotFound("Project not found.".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn permission_denied_maps_to_403() {
        let err = ApiError(Error::PermissionDenied("Not a moderator.".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
