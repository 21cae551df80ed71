// crates/hgk-gateway-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: MCP server facade for the gateway over stdio and HTTP.
// Purpose: Expose namespaced backend tools via JSON-RPC 2.0.
// Dependencies: hgk-gateway-config, axum, tokio
// ============================================================================

//! ## Overview
//! The MCP server exposes every advertised route as an MCP tool named
//! `service.capability`. `tools/call` goes through [`Gateway::call`], so the
//! full routing pipeline runs for every request. Stdio uses newline-delimited
//! JSON; HTTP serves `POST /rpc` and `GET /status`.
//!
//! Gateway failures use JSON-RPC code `-32000` with the [`GatewayError`] as
//! `data`, so clients can branch on the stable error code.
//!
//! Security posture: request bodies are untrusted and size-limited.
//!
//! [`GatewayError`]: hgk_gateway_core::GatewayError

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use hgk_gateway_config::GatewayConfig;
use hgk_gateway_config::ServerConfig;
use hgk_gateway_config::ServerTransport;
use hgk_gateway_core::descriptor::DEFAULT_PROTOCOL_VERSION;
use hgk_gateway_core::jsonrpc::JSONRPC_VERSION;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::debug;
use tracing::info;

use crate::gateway::Gateway;
use crate::router::GatewayStatus;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Server name reported by `initialize`.
const SERVER_NAME: &str = "hgk-gateway";
/// JSON-RPC parse error.
const PARSE_ERROR: i64 = -32700;
/// JSON-RPC invalid request.
const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC method not found.
const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC invalid params.
const INVALID_PARAMS: i64 = -32602;
/// Gateway failure; `data` carries the typed error.
pub const GATEWAY_ERROR: i64 = -32000;

// ============================================================================
// SECTION: MCP Server
// ============================================================================

/// MCP server instance.
pub struct McpServer {
    /// Wired gateway.
    gateway: Arc<Gateway>,
    /// Server transport settings.
    server: ServerConfig,
}

impl McpServer {
    /// Builds a new MCP server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when initialization fails.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, McpServerError> {
        let gateway = Gateway::from_config(config)?;
        Ok(Self::new(Arc::new(gateway), config.server.clone()))
    }

    /// Wraps an existing gateway.
    #[must_use]
    pub const fn new(gateway: Arc<Gateway>, server: ServerConfig) -> Self {
        Self {
            gateway,
            server,
        }
    }

    /// Returns the gateway.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Probes discovery candidates, then serves requests using the
    /// configured transport until the input closes or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the server fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        let discovered = self.gateway.discover_candidates().await;
        info!(discovered, transport = self.server.transport.as_str(), "gateway starting");
        match self.server.transport {
            ServerTransport::Stdio => {
                let reader = BufReader::new(tokio::io::stdin());
                let mut writer = tokio::io::stdout();
                serve_lines(&self.gateway, reader, &mut writer, self.server.max_body_bytes).await
            }
            ServerTransport::Http => serve_http(self.gateway, &self.server).await,
        }
    }
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves newline-delimited JSON-RPC until EOF.
pub(crate) async fn serve_lines<R, W>(
    gateway: &Gateway,
    reader: R,
    writer: &mut W,
    max_body_bytes: usize,
) -> Result<(), McpServerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|_| McpServerError::Transport("stdio read failed".to_string()))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = if line.len() > max_body_bytes {
            Some(error_response(Value::Null, INVALID_REQUEST, "request body too large", None))
        } else {
            handle_payload(gateway, line.as_bytes()).await.1
        };
        let Some(reply) = reply else {
            continue;
        };
        let mut payload = serde_json::to_vec(&reply)
            .map_err(|_| McpServerError::Transport("json-rpc serialization failed".to_string()))?;
        payload.push(b'\n');
        writer
            .write_all(&payload)
            .await
            .map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
        writer.flush().await.map_err(|_| McpServerError::Transport("stdio write failed".to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Serves JSON-RPC requests over HTTP.
async fn serve_http(gateway: Arc<Gateway>, server: &ServerConfig) -> Result<(), McpServerError> {
    let addr: SocketAddr = server.bind_addr().map_err(|err| McpServerError::Config(err.to_string()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| McpServerError::Transport("http bind failed".to_string()))?;
    info!(%addr, "serving mcp over http");
    axum::serve(listener, http_app(gateway, server.max_body_bytes))
        .await
        .map_err(|_| McpServerError::Transport("http server failed".to_string()))
}

/// Shared server state for HTTP handlers.
#[derive(Clone)]
struct ServerState {
    /// Wired gateway.
    gateway: Arc<Gateway>,
}

/// Builds the HTTP application.
pub fn http_app(gateway: Arc<Gateway>, max_body_bytes: usize) -> Router {
    let state = Arc::new(ServerState {
        gateway,
    });
    Router::new()
        .route("/rpc", post(handle_http))
        .route("/status", get(handle_status))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Handles HTTP JSON-RPC requests.
async fn handle_http(State(state): State<Arc<ServerState>>, bytes: Bytes) -> Response {
    match handle_payload(&state.gateway, &bytes).await {
        (status, Some(response)) => (status, Json(response)).into_response(),
        (_, None) => StatusCode::ACCEPTED.into_response(),
    }
}

/// Handles status requests.
async fn handle_status(State(state): State<Arc<ServerState>>) -> Json<GatewayStatus> {
    Json(state.gateway.status())
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    pub(crate) jsonrpc: String,
    /// Request identifier.
    pub(crate) id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<JsonRpcError>,
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsonRpcError {
    /// Error code.
    pub(crate) code: i64,
    /// Human-readable error message.
    pub(crate) message: String,
    /// Structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<Value>,
}

/// Tool call parameters for JSON-RPC requests.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Namespaced tool name.
    name: String,
    /// Arguments object.
    #[serde(default)]
    arguments: Option<Value>,
    /// Caller timeout; clamped to the configured ceiling.
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// MCP tool definition.
#[derive(Debug, Serialize)]
struct ToolDefinition {
    /// Namespaced tool name.
    name: String,
    /// Human description.
    description: String,
    /// Input schema; backends validate their own arguments.
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// Parses a raw payload and dispatches it.
pub(crate) async fn handle_payload(
    gateway: &Gateway,
    bytes: &[u8],
) -> (StatusCode, Option<JsonRpcResponse>) {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return (
            StatusCode::BAD_REQUEST,
            Some(error_response(Value::Null, PARSE_ERROR, "parse error", None)),
        );
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) => handle_request(gateway, request).await,
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Some(error_response(id, INVALID_REQUEST, "invalid json-rpc request", None)),
        ),
    }
}

/// Dispatches a JSON-RPC request to the gateway.
async fn handle_request(
    gateway: &Gateway,
    request: JsonRpcRequest,
) -> (StatusCode, Option<JsonRpcResponse>) {
    if request.jsonrpc != JSONRPC_VERSION {
        let id = request.id.unwrap_or(Value::Null);
        return (
            StatusCode::BAD_REQUEST,
            Some(error_response(id, INVALID_REQUEST, "invalid json-rpc version", None)),
        );
    }
    let Some(id) = request.id else {
        debug!(method = %request.method, "ignoring notification");
        return (StatusCode::ACCEPTED, None);
    };
    let (status, response) = match request.method.as_str() {
        "initialize" => (StatusCode::OK, success_response(id, initialize_result())),
        "ping" => (StatusCode::OK, success_response(id, json!({}))),
        "tools/list" => (StatusCode::OK, success_response(id, tools_list_result(gateway))),
        "tools/call" => handle_tool_call(gateway, id, request.params).await,
        "gateway/status" => match serde_json::to_value(gateway.status()) {
            Ok(value) => (StatusCode::OK, success_response(id, value)),
            Err(_) => (
                StatusCode::OK,
                error_response(id, GATEWAY_ERROR, "serialization failed", None),
            ),
        },
        _ => (StatusCode::BAD_REQUEST, error_response(id, METHOD_NOT_FOUND, "method not found", None)),
    };
    (status, Some(response))
}

/// Validates tool call params and forwards through the gateway.
async fn handle_tool_call(
    gateway: &Gateway,
    id: Value,
    params: Option<Value>,
) -> (StatusCode, JsonRpcResponse) {
    let Ok(call) = serde_json::from_value::<ToolCallParams>(params.unwrap_or(Value::Null)) else {
        return (StatusCode::BAD_REQUEST, error_response(id, INVALID_PARAMS, "invalid tool params", None));
    };
    let arguments = match call.arguments {
        None | Some(Value::Null) => json!({}),
        Some(arguments @ Value::Object(_)) => arguments,
        Some(_) => {
            return (
                StatusCode::BAD_REQUEST,
                error_response(id, INVALID_PARAMS, "arguments must be an object", None),
            );
        }
    };
    let result = gateway.call(&call.name, arguments, call.timeout_ms).await;
    match result.outcome {
        Ok(value) => (StatusCode::OK, success_response(id, value)),
        Err(err) => {
            let data = serde_json::to_value(&err).ok();
            (StatusCode::OK, error_response(id, GATEWAY_ERROR, &err.to_string(), data))
        }
    }
}

/// Result payload for `initialize`.
fn initialize_result() -> Value {
    json!({
        "protocolVersion": DEFAULT_PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

/// Result payload for `tools/list`.
fn tools_list_result(gateway: &Gateway) -> Value {
    let tools: Vec<ToolDefinition> = gateway
        .router()
        .list_tools()
        .into_iter()
        .map(|route| ToolDefinition {
            description: if route.description.is_empty() {
                format!("{} (via {})", route.capability, route.service)
            } else {
                route.description
            },
            name: route.namespaced_name,
            input_schema: json!({ "type": "object" }),
        })
        .collect();
    json!({ "tools": tools })
}

/// Builds a success envelope.
fn success_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

/// Builds an error envelope.
fn error_response(id: Value, code: i64, message: &str, data: Option<Value>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_string(),
            data,
        }),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCP server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}
