//! HTTP error mapping: every failure surfaces as `{"error": "..."}` with a
//! status code matching its kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use grantline_core::Error;

/// Wrapper turning core errors into API responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) | Error::OpportunityNotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) | Error::Blocked(_) => StatusCode::FORBIDDEN,
            Error::InvalidInput(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Internal details stay in the logs.
            tracing::error!(subsystem = "api", error = %self.0, "Request failed");
            "Internal Server Error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_for(e: Error) -> StatusCode {
        ApiError(e).into_response().status()
    }

    #[test]
    fn error_kinds_map_to_status_codes() {
        assert_eq!(status_for(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(Error::Unauthorized("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(Error::Blocked("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(Error::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
