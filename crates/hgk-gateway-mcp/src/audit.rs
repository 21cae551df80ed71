// crates/hgk-gateway-mcp/src/audit.rs
// ============================================================================
// Module: Route Audit Logging
// Description: Structured audit events for routing decisions and forwards.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: hgk-gateway-core, serde, tracing
// ============================================================================

//! ## Overview
//! Policy refusals, approval gates, and forward outcomes are recorded as
//! [`RouteAuditEvent`]s. Sinks write them to `tracing`, to a JSON-lines file,
//! or nowhere. Arguments and backend payloads are never included.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::PolicyDecision;
use hgk_gateway_core::PolicyResult;
use serde::Serialize;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event for one routing decision or forward.
#[derive(Debug, Clone, Serialize)]
pub struct RouteAuditEvent {
    /// Event identifier (`policy_decision` or `forward`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Namespaced tool name as requested.
    pub tool: String,
    /// Target service.
    pub service: Option<String>,
    /// Bare capability name.
    pub capability: Option<String>,
    /// Policy decision when the policy stage ran.
    pub decision: Option<PolicyDecision>,
    /// Name of the policy that decided.
    pub policy_name: Option<String>,
    /// Log level requested by the policy.
    pub log_level: Option<String>,
    /// Decision reason.
    pub reason: Option<String>,
    /// Error code for failed forwards.
    pub error_code: Option<ErrorCode>,
    /// Transport label when routing succeeded.
    pub transport: Option<String>,
    /// Forward latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl RouteAuditEvent {
    /// Builds an event for a policy refusal or approval gate.
    #[must_use]
    pub fn policy_decision(tool: &str, service: &str, capability: &str, result: &PolicyResult) -> Self {
        Self {
            event: "policy_decision",
            timestamp_ms: now_ms(),
            tool: tool.to_string(),
            service: Some(service.to_string()),
            capability: Some(capability.to_string()),
            decision: Some(result.decision),
            policy_name: result.policy_name.clone(),
            log_level: Some(result.log_level.clone()),
            reason: Some(result.reason.clone()),
            error_code: None,
            transport: None,
            latency_ms: None,
        }
    }

    /// Builds an event for a completed forward attempt.
    #[must_use]
    pub fn forward(
        tool: &str,
        target: Option<(&str, &str)>,
        transport: Option<&str>,
        error_code: Option<ErrorCode>,
        latency: Duration,
    ) -> Self {
        Self {
            event: "forward",
            timestamp_ms: now_ms(),
            tool: tool.to_string(),
            service: target.map(|(service, _)| service.to_string()),
            capability: target.map(|(_, capability)| capability.to_string()),
            decision: None,
            policy_name: None,
            log_level: None,
            reason: None,
            error_code,
            transport: transport.map(ToString::to_string),
            latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Current wall-clock time in milliseconds.
fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for route events.
pub trait RouteAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &RouteAuditEvent);
}

/// Audit sink that emits events through `tracing`.
pub struct TracingAuditSink;

impl RouteAuditSink for TracingAuditSink {
    fn record(&self, event: &RouteAuditEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => info!(target: "hgk_gateway::audit", event = event.event, "{payload}"),
            Err(err) => warn!(target: "hgk_gateway::audit", error = %err, "audit serialization failed"),
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl RouteAuditSink for FileAuditSink {
    fn record(&self, event: &RouteAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl RouteAuditSink for NoopAuditSink {
    fn record(&self, _event: &RouteAuditEvent) {}
}
