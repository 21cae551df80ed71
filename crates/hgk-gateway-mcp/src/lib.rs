// crates/hgk-gateway-mcp/src/lib.rs
// ============================================================================
// Module: HGK Gateway MCP
// Description: Virtual router, forwarding transports, and MCP server facade.
// Purpose: Route namespaced MCP tool calls to backend services.
// Dependencies: hgk-gateway-core, hgk-gateway-config, axum, reqwest, tokio
// ============================================================================

//! ## Overview
//! This crate turns the leaf components from `hgk-gateway-core` into a working
//! gateway. The [`VirtualRouter`] resolves `service.capability` names through
//! discovery, policy, and auth before any I/O, then forwards the call over a
//! [`ForwardTransport`]. [`Gateway`] composes everything from a
//! [`hgk_gateway_config::GatewayConfig`], and [`McpServer`] exposes the result
//! as an MCP server over stdio or HTTP.
//!
//! Security posture: request payloads and backend responses are untrusted and
//! size-limited; routing decisions fail closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod gateway;
pub mod router;
pub mod server;
pub mod telemetry;
pub mod transport;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::RouteAuditEvent;
pub use audit::RouteAuditSink;
pub use audit::TracingAuditSink;
pub use gateway::Gateway;
pub use router::ForwardResult;
pub use router::GatewayStatus;
pub use router::ResolvedRoute;
pub use router::ToolRoute;
pub use router::VirtualRouter;
pub use server::McpServer;
pub use server::McpServerError;
pub use telemetry::FORWARD_LATENCY_BUCKETS_MS;
pub use telemetry::ForwardMetricEvent;
pub use telemetry::ForwardMetrics;
pub use telemetry::ForwardOutcome;
pub use telemetry::NoopMetrics;
pub use transport::ForwardTransport;
pub use transport::LocalCall;
pub use transport::ProcessHttpTransport;
pub use transport::RemoteCall;
pub use transport::TransportError;
