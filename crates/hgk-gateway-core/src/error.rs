// crates/hgk-gateway-core/src/error.rs
// ============================================================================
// Module: Gateway Errors
// Description: Uniform error shape for routing and forwarding failures.
// Purpose: Give every expected failure a stable machine-readable code.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every failure the router can produce, from a malformed namespace to a
//! backend timeout, is expressed as a [`GatewayError`] carrying an
//! [`ErrorCode`], a human message, the service and capability involved, and a
//! structured detail map. Callers branch on the code, never on the message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable machine-readable failure codes.
///
/// # Invariants
/// - Serialized labels are stable and match [`ErrorCode::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Name did not split into two non-empty `service.capability` parts.
    InvalidNamespace,
    /// Service is not present in the discovery registry.
    ServerNotFound,
    /// Policy enforcer denied the call.
    PolicyDenied,
    /// A destructive-operation rule requires human approval.
    ApprovalRequired,
    /// Auth proxy could not authenticate the service.
    AuthFailed,
    /// The service transport cannot be forwarded over.
    UnsupportedTransport,
    /// Local-process service has no command configured.
    NoCommand,
    /// Local-process command could not be launched.
    CommandNotFound,
    /// Forwarding exceeded the caller timeout.
    Timeout,
    /// Local process exited with a non-zero status.
    ProcessError,
    /// Backend output was not a JSON-RPC response envelope.
    InvalidResponse,
    /// Remote service has no URL configured.
    NoUrl,
    /// HTTP transport failure or non-success status.
    HttpError,
    /// Backend returned a JSON-RPC error object.
    JsonrpcError,
    /// Unexpected failure at the forwarding boundary.
    ForwardError,
}

impl ErrorCode {
    /// Returns the stable label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidNamespace => "INVALID_NAMESPACE",
            Self::ServerNotFound => "SERVER_NOT_FOUND",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::UnsupportedTransport => "UNSUPPORTED_TRANSPORT",
            Self::NoCommand => "NO_COMMAND",
            Self::CommandNotFound => "COMMAND_NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::ProcessError => "PROCESS_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::NoUrl => "NO_URL",
            Self::HttpError => "HTTP_ERROR",
            Self::JsonrpcError => "JSONRPC_ERROR",
            Self::ForwardError => "FORWARD_ERROR",
        }
    }

    /// Returns true when the failure came from the routing pipeline.
    #[must_use]
    pub const fn is_routing(self) -> bool {
        matches!(
            self,
            Self::InvalidNamespace
                | Self::ServerNotFound
                | Self::PolicyDenied
                | Self::ApprovalRequired
                | Self::AuthFailed
        )
    }

    /// Returns true when a retry of the same call could plausibly succeed.
    ///
    /// Configuration gaps (`NO_COMMAND`, `NO_URL`), environment gaps
    /// (`COMMAND_NOT_FOUND`), and routing decisions are never retryable.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ProcessError
                | Self::InvalidResponse
                | Self::HttpError
                | Self::JsonrpcError
                | Self::ForwardError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Gateway Error
// ============================================================================

/// Typed failure returned by routing and forwarding.
///
/// # Invariants
/// - `code` is the only field callers should branch on.
/// - `details` never contains credentials.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct GatewayError {
    /// Machine-readable failure code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Service involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Capability involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Structured context such as the policy that fired.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl GatewayError {
    /// Creates an error with no service context.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service: None,
            capability: None,
            details: BTreeMap::new(),
        }
    }

    /// Attaches the service and capability the failure applies to.
    #[must_use]
    pub fn with_target(mut self, service: impl Into<String>, capability: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self.capability = Some(capability.into());
        self
    }

    /// Attaches the service only.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Adds a structured detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns a detail entry as a string when present.
    #[must_use]
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Renders the `{"error": {...}}` envelope used on the wire and in logs.
    ///
    /// Details are flattened next to `code` and `message`; they never
    /// override those two keys.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (key, value) in &self.details {
            body.insert(key.clone(), value.clone());
        }
        body.insert("code".to_string(), Value::String(self.code.as_str().to_string()));
        body.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(service) = &self.service {
            body.insert("server".to_string(), Value::String(service.clone()));
        }
        if let Some(capability) = &self.capability {
            body.insert("tool".to_string(), Value::String(capability.clone()));
        }
        let mut envelope = Map::new();
        envelope.insert("error".to_string(), Value::Object(body));
        Value::Object(envelope)
    }
}
