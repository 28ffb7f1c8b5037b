//! Bearer token presence check for the chat endpoint.
//!
//! The vendor is reached without any caller credentials, so the token is
//! never validated against anything; the middleware only insists that an
//! `Authorization: Bearer <token>` header is present, the way OpenAI clients
//! always send one. `OPTIONS` requests pass through untouched so CORS
//! preflights keep working.

use axum::{
    extract::Request,
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

/// Axum middleware: rejects requests without a non-empty Bearer token.
pub async fn bearer_auth_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let token_len = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.trim().is_empty())
        .map(str::len);

    match token_len {
        Some(token_len) => {
            tracing::debug!(token_len, "request authenticated");
            next.run(req).await
        }
        None => AppError::Unauthorized.into_response(),
    }
}
