use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use px_core::PxError;
use serde_json::json;
use tracing::{debug, error};

/// A [`PxError`] on its way to an HTTP client.
#[derive(Debug)]
pub struct ApiError(pub PxError);

impl From<PxError> for ApiError {
    fn from(e: PxError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PxError::SymbolNotFound(_) | PxError::UnknownExchange(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            debug!("request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
