//! HTTP error type for the inbound side of the adapter.
//!
//! Only malformed inbound requests ever reach the client as an error status.
//! Upstream failures are recovered inside [`crate::router`] and never surface
//! here, so every variant maps to a 4xx.
//!
//! ```rust,ignore
//! async fn handler(body: Bytes) -> Result<Json<Value>, AppError> {
//!     let request = ChatRequest::from_slice(&body)?;
//!     // ...
//! }
//! ```

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing or invalid authorization header")]
    Unauthorized,

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Messages array cannot be empty")]
    EmptyMessages,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidBody(_) | Self::EmptyMessages => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(%status, error = %self, "rejecting request");
        let body = Json(json!({ "error": self.to_string() }));

        match self {
            Self::Unauthorized => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer realm=\"you2api\"")],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
