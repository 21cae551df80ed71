// crates/hgk-gateway-core/src/jsonrpc.rs
// ============================================================================
// Module: JSON-RPC Envelopes
// Description: Request and response envelopes exchanged with MCP backends.
// Purpose: Share one envelope shape between local and remote forwarding.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Backends receive a JSON-RPC 2.0 `tools/call` request and answer with an
//! envelope holding either `result` or `error`. A populated `error` is a call
//! failure even when the transport itself reported success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";
/// MCP method used for capability invocation.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Monotonic request identifier source.
static JSON_RPC_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SECTION: Request
// ============================================================================

/// JSON-RPC request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters payload.
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Builds a request with an explicit identifier.
    #[must_use]
    pub fn new(method: &str, params: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Builds a `tools/call` request for a bare capability name.
    #[must_use]
    pub fn tools_call(capability: &str, arguments: Value) -> Self {
        Self::new(
            TOOLS_CALL_METHOD,
            json!({ "name": capability, "arguments": arguments }),
            next_request_id(),
        )
    }
}

/// Returns the next process-unique numeric request identifier.
#[must_use]
pub fn next_request_id() -> Value {
    Value::Number(serde_json::Number::from(JSON_RPC_ID_COUNTER.fetch_add(1, Ordering::Relaxed)))
}

// ============================================================================
// SECTION: Response
// ============================================================================

/// JSON-RPC response envelope received from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC protocol version, when echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Request identifier echoed by the backend.
    #[serde(default)]
    pub id: Value,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload; kept raw so upstream details survive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    /// Parses a JSON value as a response envelope.
    ///
    /// Returns `None` unless the value is an object carrying `result` or
    /// `error`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        if !object.contains_key("result") && !object.contains_key("error") {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Returns the embedded error object, when populated.
    #[must_use]
    pub fn embedded_error(&self) -> Option<&Value> {
        self.error.as_ref().filter(|error| !error.is_null())
    }

    /// Returns a human message for the embedded error.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        let error = self.embedded_error()?;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), ToString::to_string);
        Some(message)
    }
}
