//! Ingress HTTP server
//!
//! Implements:
//! - `ANY /h/:id` and `ANY /h/:id/*rest` - webhook ingress
//! - `GET /health` - liveness probe
//!
//! Ingress only snapshots the request and hands it to the dispatcher; the
//! sender gets `{"ok":true}` before any component runs.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::hooks::{HookStore, Request};
use crate::pipeline::dispatch::Delivery;
use crate::pipeline::{DispatchError, Dispatcher};

/// Default max ingress body size (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Ingress server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Max body size for deliveries in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Shared state for ingress handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    pub hooks: HookStore,
    pub dispatcher: Dispatcher,
    /// Start time (Unix timestamp)
    pub start_time: i64,
}

#[derive(Debug, Deserialize)]
struct IngressPath {
    id: String,
}

/// Create the ingress router.
pub fn create_router(config: HttpConfig, hooks: HookStore, dispatcher: Dispatcher) -> Router {
    let max_body_bytes = config.max_body_bytes;
    let state = AppState {
        config: Arc::new(config),
        hooks,
        dispatcher,
        start_time: chrono::Utc::now().timestamp(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/h/:id", any(ingress_handler))
        .route("/h/:id/*rest", any(ingress_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// GET /health - Lightweight liveness probe.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

/// ANY /h/:id - accept a delivery for a known hook.
async fn ingress_handler(
    State(state): State<AppState>,
    Path(path): Path<IngressPath>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.len() > state.config.max_body_bytes {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large");
    }

    let hook = match state.hooks.find(&path.id).await {
        Ok(hook) => hook,
        Err(e) if e.is_not_found() => {
            debug!(target: "http", hook = %path.id, "delivery for unknown hook");
            return error_response(StatusCode::NOT_FOUND, "hook not found");
        }
        Err(e) => {
            error!(target: "http", hook = %path.id, error = %e, "failed to load hook");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    let request = Request::from_http(&method, &headers, &body);
    match state.dispatcher.try_dispatch(Delivery { hook, request }) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(DispatchError::QueueFull) => {
            warn!(target: "http", hook = %path.id, "delivery queue full; dropping delivery");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "delivery queue full")
        }
        Err(DispatchError::Closed) => {
            warn!(target: "http", hook = %path.id, "shutting down; dropping delivery");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
        }
    }
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "ok": false,
            "error": message,
        })),
    )
        .into_response()
}
