// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Routes:
// - POST /api/chat/stream  relay one turn as SSE
// - POST /api/chat         non-streaming convenience completion
// - POST /mcp              invoke a catalog tool
// - GET  /mcp/tools        catalog discovery
// - GET  /v1/heartbeat     liveness probe
//
// Fault contract: catalog/validation failures surface as non-2xx with a
// structured {code, message, details} body; in-band tool outcomes are
// always 200 with {ok, data|error}.

use crate::relay::{self, RelayEvent};
use crate::tools::{DispatchError, ToolCatalog, ToolResult, MCP_VERSION, SERVER_NAME};
use crate::upstream::{ChatMessage, ChatTurn, UpstreamClient};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The address the server binds to. Always localhost, never 0.0.0.0.
pub const BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 3001);

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Defaults applied when a chat request leaves fields unset.
#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub model: String,
    pub temperature: f64,
}

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub catalog: Arc<ToolCatalog>,
    pub defaults: ChatDefaults,
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Request-level faults, reported as non-2xx with a structured body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} is missing required argument '{field}'")]
    BadArguments { tool: String, field: String },

    #[error("request body is missing '{0}'")]
    MissingField(&'static str),

    #[error("{0}")]
    Upstream(String),
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::UnknownTool(name) => ApiError::UnknownTool(name),
            DispatchError::BadArguments { tool, field } => ApiError::BadArguments { tool, field },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            ApiError::UnknownTool(name) => (
                StatusCode::NOT_FOUND,
                "unknown_tool",
                json!({ "name": name }),
            ),
            ApiError::BadArguments { tool, field } => (
                StatusCode::BAD_REQUEST,
                "bad_arguments",
                json!({ "tool": tool, "field": field }),
            ),
            ApiError::MissingField(field) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                json!({ "field": field }),
            ),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", Value::Null),
        };

        let body = json!({
            "code": code,
            "message": self.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub args: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with all routes. Collaborators are injected via
/// state — no side effects, no hard-coded clients.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat", post(chat))
        .route("/mcp", post(invoke_tool))
        .route("/mcp/tools", get(list_tools))
        .route("/v1/heartbeat", get(heartbeat))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK
async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

fn build_turn(state: &AppState, request: ChatRequest) -> ChatTurn {
    ChatTurn::new(
        request
            .model
            .unwrap_or_else(|| state.defaults.model.clone()),
        request.temperature.unwrap_or(state.defaults.temperature),
        request.history,
        &request.prompt,
    )
}

/// Relay one turn as an SSE stream.
///
/// Wire format: one `: ping` comment frame on open, then `data:` frames
/// carrying `{"token": …}` or `{"error": …}`, terminated by `event: done`
/// with a `[DONE]` sentinel payload.
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        %request_id,
        model = request.model.as_deref().unwrap_or(&state.defaults.model),
        history_len = request.history.len(),
        "chat stream opened"
    );

    let turn = build_turn(&state, request);
    let events = relay::run(state.upstream.clone(), turn, request_id);

    let heartbeat = futures_util::stream::once(std::future::ready(Ok(
        Event::default().comment("ping"),
    )));
    let frames = events.map(|event| Ok::<Event, Infallible>(sse_frame(event)));

    Sse::new(heartbeat.chain(frames)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}

fn sse_frame(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Token(token) => Event::default()
            .data(serde_json::to_string(&json!({ "token": token })).unwrap_or_default()),
        RelayEvent::Error(message) => Event::default()
            .data(serde_json::to_string(&json!({ "error": message })).unwrap_or_default()),
        RelayEvent::Done => Event::default().event("done").data("[DONE]"),
    }
}

/// Non-streaming convenience completion: the same relay session, folded
/// into a single response body.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let turn = build_turn(&state, request);
    let mut events = relay::run(state.upstream.clone(), turn, request_id);

    let mut response = String::new();
    while let Some(event) = events.next().await {
        match event {
            RelayEvent::Token(token) => response.push_str(&token),
            RelayEvent::Done => break,
            RelayEvent::Error(message) => return Err(ApiError::Upstream(message)),
        }
    }
    Ok(Json(json!({ "response": response })))
}

/// Invoke a catalog tool. In-band outcomes are 200; catalog and validation
/// failures become structured faults.
async fn invoke_tool(
    State(state): State<AppState>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<ToolResult>, ApiError> {
    let name = request.name.ok_or(ApiError::MissingField("name"))?;

    let result = state.catalog.invoke(&name, request.args).await?;
    tracing::info!(tool = %name, ok = result.is_success(), "tool invocation");
    Ok(Json(result))
}

/// Catalog discovery: server metadata plus every tool specification.
async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "server": SERVER_NAME,
        "version": MCP_VERSION,
        "tools": state.catalog.specs(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
