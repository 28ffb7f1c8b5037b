//! Client-facing API: the OpenAI-compatible surface.
//!
//! Handlers stay thin. Request validation lives in [`crate::chat`], retrieval
//! in [`crate::router`], and response shapes in [`crate::framer`].

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    api::client_auth,
    chat::ChatRequest,
    error::AppError,
    framer::Framer,
    router::{self, RouterState},
};

/// Build the client-facing axum router.
///
/// Only the chat endpoint requires a Bearer token. Every path without a route
/// answers with the service status object, whatever the method.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions).options(preflight))
        .route_layer(middleware::from_fn(client_auth::bearer_auth_middleware))
        .route("/healthz", get(healthz))
        .route("/v1/models", get(list_models))
        .fallback(service_status)
        .layer(cors())
        .with_state(state)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// `POST /v1/chat/completions`
///
/// The body is read raw so that malformed JSON and an empty `messages` array
/// both surface as the adapter's own 400 shape rather than axum's rejection.
pub async fn chat_completions(
    State(state): State<Arc<RouterState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = ChatRequest::from_slice(&body)?;
    info!(
        model = %request.model,
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion request"
    );

    if request.stream {
        let sse = router::stream_completion(Arc::clone(&state), request);
        return Ok((
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(sse),
        )
            .into_response());
    }

    let content = router::complete(&state, &request).await;
    let framer = Framer::new(&request.model);
    info!(id = framer.id(), len = content.len(), "chat completion ready");
    Ok(Json(framer.completion(&content)).into_response())
}

/// Explicit `OPTIONS` on the chat path; the CORS layer adds the headers.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// `GET /v1/models`: the public model ids in the OpenAI list shape.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let data: Vec<Value> = state
        .models
        .public_ids()
        .map(|id| json!({ "id": id, "object": "model", "owned_by": "you2api" }))
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

/// `GET /healthz`: always 200, never touches the vendor.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Any other path.
pub async fn service_status(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({
        "status": "You2Api Service Running...",
        "message": "Send POST requests to /v1/chat/completions",
        "mode": state.config.gateway.handler_mode.to_string(),
    }))
}
