//! Error-to-response mapping
//!
//! Business errors cross the boundary verbatim; internal errors are logged
//! with full detail and rendered generically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeops_core::VaultError;
use serde_json::json;
use tracing::error;

pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "not-found" => StatusCode::NOT_FOUND,
            "invalid-input" => StatusCode::BAD_REQUEST,
            "forbidden" => StatusCode::FORBIDDEN,
            "integrity-failure" => StatusCode::UNPROCESSABLE_ENTITY,
            "sealed" => StatusCode::SERVICE_UNAVAILABLE,
            "not-implemented" => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if kind == "internal" {
            error!(error = ?self.0, "internal error");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: VaultError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_of(VaultError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(VaultError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(VaultError::Sealed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(VaultError::IntegrityFailure("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(VaultError::NotImplemented("x".into())),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            status_of(VaultError::internal(std::io::Error::other("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
