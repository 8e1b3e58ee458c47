use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::grid::GridError;
use crate::mapbox::ProviderError;
use crate::spatial::AdapterError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error("{0}")]
    Internal(String),
}

impl From<GridError> for ApiError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::InvalidBBox => ApiError::InvalidInput(err.to_string()),
            GridError::Adapter(e) => ApiError::Adapter(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(ProviderError::MissingToken) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Adapter(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_bbox_is_a_client_error() {
        let err = ApiError::from(GridError::InvalidBBox);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "min values must be <= max values");
    }

    #[test]
    fn adapter_failure_is_a_server_error() {
        let err = ApiError::from(GridError::Adapter(AdapterError::InvalidResolution(40)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_failure_is_a_bad_gateway() {
        assert_eq!(
            ApiError::from(ProviderError::NoRoutes).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(ProviderError::MissingToken).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
