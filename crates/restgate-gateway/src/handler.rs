//! Protocol handler: the HTTP surface mounted at the context path.
//!
//! Each route forwards straight to one of the backend services. Request
//! and response bodies are JSON; errors use the RESTCONF `errors` envelope.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, warn};

use restgate_core::error::{GatewayError, Result};
use restgate_core::services::ServiceHandleSet;
use restgate_core::streams::StreamsConfiguration;

use crate::schema::{SchemaContextHandle, SchemaContextLifecycle};

/// Revision of ietf-yang-library the gateway reports.
pub const YANG_LIBRARY_VERSION: &str = "2019-01-04";

struct HandlerState {
    services: ServiceHandleSet,
    schema: SchemaContextHandle,
    streams: StreamsConfiguration,
}

/// A built protocol handler, ready to attach to a listener.
pub struct ProtocolHandler {
    router: Router,
}

impl ProtocolHandler {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

pub struct ProtocolHandlerFactory;

impl ProtocolHandlerFactory {
    /// Build the protocol handler.
    ///
    /// `streams` is validated first; a malformed configuration fails with
    /// [`GatewayError::Configuration`] before anything is constructed. The
    /// schema lifecycle must already be open.
    pub fn build(
        services: &ServiceHandleSet,
        schema: &SchemaContextLifecycle,
        streams: &StreamsConfiguration,
    ) -> Result<ProtocolHandler> {
        streams.validate()?;
        if !schema.is_open() {
            return Err(GatewayError::Initialization(
                "Schema context must be open before the protocol handler is built".into(),
            ));
        }

        let state = Arc::new(HandlerState {
            services: services.clone(),
            schema: schema.handle(),
            streams: streams.clone(),
        });

        let router = Router::new()
            .route("/", get(root_handler))
            .route(
                "/data/{*path}",
                get(read_data).put(put_data).delete(delete_data),
            )
            .route("/operations/{*name}", post(invoke_rpc))
            .route("/actions/{*path}", post(invoke_action))
            .route("/streams", get(list_streams))
            .route("/mounts", get(list_mounts))
            .route("/modules", get(list_modules))
            .route("/yang-library-version", get(yang_library_version))
            .with_state(state);

        Ok(ProtocolHandler { router })
    }
}

fn error_response(status: StatusCode, tag: &str, message: impl Into<String>) -> Response {
    let error_type = if status.is_server_error() {
        "application"
    } else {
        "protocol"
    };
    (
        status,
        Json(json!({
            "errors": {
                "error": [{
                    "error-type": error_type,
                    "error-tag": tag,
                    "error-message": message.into(),
                }]
            }
        })),
    )
        .into_response()
}

fn service_failure(operation: &str, err: anyhow::Error) -> Response {
    warn!(operation, error = %err, "Backend service call failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "operation-failed",
        err.to_string(),
    )
}

/// Parse an optional JSON body. An empty body is `null`.
fn parse_body(body: &Bytes) -> std::result::Result<serde_json::Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "malformed-message",
            format!("Invalid JSON body: {e}"),
        )
    })
}

/// RPC and action bodies may wrap their payload as `{"input": ...}`.
fn unwrap_input(body: serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("input") => {
            map.remove("input").unwrap_or_default()
        }
        other => other,
    }
}

fn operation_output(output: serde_json::Value) -> Response {
    if output.is_null() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        Json(json!({ "output": output })).into_response()
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "ietf-restconf:restconf": {
            "data": {},
            "operations": {},
            "yang-library-version": YANG_LIBRARY_VERSION,
        }
    }))
}

async fn read_data(
    State(state): State<Arc<HandlerState>>,
    Path(path): Path<String>,
) -> Response {
    match state.services.data_broker.read(&path).await {
        Ok(Some(value)) => Json(value).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "data-missing",
            format!("No data at '{path}'"),
        ),
        Err(e) => service_failure("read", e),
    }
}

async fn put_data(
    State(state): State<Arc<HandlerState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let value = match parse_body(&body) {
        Ok(serde_json::Value::Null) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "missing-element",
                "PUT requires a JSON body",
            );
        }
        Ok(value) => value,
        Err(resp) => return resp,
    };
    match state.services.data_broker.put(&path, value).await {
        Ok(()) => {
            debug!(path = %path, "Data replaced");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => service_failure("put", e),
    }
}

async fn delete_data(
    State(state): State<Arc<HandlerState>>,
    Path(path): Path<String>,
) -> Response {
    match state.services.data_broker.delete(&path).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "data-missing",
            format!("No data at '{path}'"),
        ),
        Err(e) => service_failure("delete", e),
    }
}

async fn invoke_rpc(
    State(state): State<Arc<HandlerState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let input = match parse_body(&body) {
        Ok(value) => unwrap_input(value),
        Err(resp) => return resp,
    };
    let started = Instant::now();
    let result = state.services.rpc.invoke(&name, input).await;
    debug!(rpc = %name, elapsed_ms = started.elapsed().as_millis() as u64, "RPC invoked");
    match result {
        Ok(Some(output)) => operation_output(output),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "operation-not-supported",
            format!("Unknown RPC '{name}'"),
        ),
        Err(e) => service_failure("rpc", e),
    }
}

async fn invoke_action(
    State(state): State<Arc<HandlerState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let input = match parse_body(&body) {
        Ok(value) => unwrap_input(value),
        Err(resp) => return resp,
    };
    match state.services.action.invoke(&path, input).await {
        Ok(Some(output)) => operation_output(output),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "operation-not-supported",
            format!("No action at '{path}'"),
        ),
        Err(e) => service_failure("action", e),
    }
}

async fn list_streams(State(state): State<Arc<HandlerState>>) -> impl IntoResponse {
    let streams = &state.streams;
    let base = streams.base_uri.as_deref().map(|b| b.trim_end_matches('/'));
    let entries: Vec<serde_json::Value> = state
        .services
        .notification
        .streams()
        .into_iter()
        .map(|name| {
            let location = base.map(|b| format!("{b}/{name}"));
            json!({ "name": name, "location": location })
        })
        .collect();

    Json(json!({
        "streams": entries,
        "use_sse": streams.use_sse,
        "heartbeat_interval_ms": streams.heartbeat_interval_ms,
        "idle_timeout_ms": streams.idle_timeout_ms,
        "maximum_fragment_length": streams.maximum_fragment_length,
    }))
}

async fn list_mounts(State(state): State<Arc<HandlerState>>) -> impl IntoResponse {
    Json(json!({ "mount_points": state.services.mount_point.mount_points() }))
}

async fn list_modules(State(state): State<Arc<HandlerState>>) -> Response {
    match state.schema.current() {
        Some(ctx) => Json(json!({
            "module-set-id": ctx.generation.to_string(),
            "module": ctx.modules,
        }))
        .into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "resource-denied",
            "Schema context is not available",
        ),
    }
}

async fn yang_library_version() -> impl IntoResponse {
    Json(json!({ "ietf-restconf:yang-library-version": YANG_LIBRARY_VERSION }))
}
