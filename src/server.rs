use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models;
use crate::proxy;
use crate::translate::request::translate_request;
use crate::translate::types::{ChatRequest, UpstreamRequest};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Process-wide state, built once at startup and shared read-only by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub api_key: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/models", get(handle_models))
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse request");
            return ProxyError::invalid_request(format!("Invalid request body: {}", e))
                .into_response();
        }
    };

    let upstream_req = translate_request(
        &req,
        &state.config.upstream.default_model,
        &state.config.limits,
    );

    tracing::info!(
        model = %upstream_req.model,
        stream = upstream_req.stream,
        messages = upstream_req.messages.len(),
        "Chat completion request"
    );

    if upstream_req.stream {
        handle_streaming(state, &upstream_req).await
    } else {
        handle_non_streaming(state, &upstream_req).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, req: &UpstreamRequest) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.client, &state.api_key).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_streaming(state: Arc<AppState>, req: &UpstreamRequest) -> Response {
    let sse_stream =
        match proxy::proxy_streaming(req, &state.config, &state.client, &state.api_key).await {
            Ok(s) => s,
            Err(e) => return e.into_response(),
        };

    let event_stream =
        sse_stream.map(|data| -> std::result::Result<Event, Infallible> { Ok(Event::default().data(data)) });

    // Sse already sets `cache-control: no-cache`; this stops reverse proxies buffering.
    (
        [("x-accel-buffering", "no")],
        Sse::new(event_stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Response {
    let (status, body) = models::list_models(&state.config, &state.client, &state.api_key).await;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "NVIDIA NIM Proxy is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");
    ProxyError::internal("unexpected fault while handling request").into_response()
}
