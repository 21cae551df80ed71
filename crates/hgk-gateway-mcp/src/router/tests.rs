// crates/hgk-gateway-mcp/src/router/tests.rs
// ============================================================================
// Module: Virtual Router Unit Tests
// Description: Tests for routing order, transport dispatch, and introspection.
// Purpose: Keep routing ahead of I/O and every transport on a defined path.
// Dependencies: hgk-gateway-core, hgk-gateway-mcp, tokio
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use hgk_gateway_core::AuthConfig;
use hgk_gateway_core::AuthMode;
use hgk_gateway_core::AuthProxy;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::GatewayError;
use hgk_gateway_core::JsonRpcResponse;
use hgk_gateway_core::PolicyDocument;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_core::ServiceDescriptor;
use hgk_gateway_core::TransportKind;
use serde_json::Value;
use serde_json::json;

use super::ForwardResult;
use super::VirtualRouter;
use super::split_namespace;
use crate::audit::RouteAuditEvent;
use crate::audit::RouteAuditSink;
use crate::telemetry::ForwardMetricEvent;
use crate::telemetry::ForwardMetrics;
use crate::telemetry::ForwardOutcome;
use crate::transport::ForwardTransport;
use crate::transport::LocalCall;
use crate::transport::RemoteCall;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Transport that counts calls and replies with a canned envelope.
struct CountingTransport {
    local: AtomicUsize,
    remote: AtomicUsize,
    reply: Value,
    seen_timeout: Mutex<Option<Duration>>,
    seen_headers: Mutex<Vec<(String, String)>>,
}

impl CountingTransport {
    fn replying(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            local: AtomicUsize::new(0),
            remote: AtomicUsize::new(0),
            reply,
            seen_timeout: Mutex::new(None),
            seen_headers: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.local.load(Ordering::SeqCst) + self.remote.load(Ordering::SeqCst)
    }

    fn envelope(&self) -> Result<JsonRpcResponse, GatewayError> {
        JsonRpcResponse::from_value(self.reply.clone())
            .ok_or_else(|| GatewayError::new(ErrorCode::InvalidResponse, "canned reply"))
    }
}

#[async_trait]
impl ForwardTransport for CountingTransport {
    async fn call_local(&self, call: LocalCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        self.local.fetch_add(1, Ordering::SeqCst);
        *self.seen_timeout.lock().unwrap() = Some(call.timeout);
        assert_eq!(call.request.method, "tools/call");
        self.envelope()
    }

    async fn call_remote(&self, call: RemoteCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        self.remote.fetch_add(1, Ordering::SeqCst);
        *self.seen_timeout.lock().unwrap() = Some(call.timeout);
        *self.seen_headers.lock().unwrap() =
            call.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.envelope()
    }
}

#[derive(Default)]
struct RecordingAudit {
    events: Mutex<Vec<RouteAuditEvent>>,
}

impl RouteAuditSink for RecordingAudit {
    fn record(&self, event: &RouteAuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct RecordingMetrics {
    events: Mutex<Vec<ForwardMetricEvent>>,
    latencies: AtomicUsize,
}

impl ForwardMetrics for RecordingMetrics {
    fn record_forward(&self, event: &ForwardMetricEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn record_latency(&self, _event: &ForwardMetricEvent, _latency: Duration) {
        self.latencies.fetch_add(1, Ordering::SeqCst);
    }
}

const POLICY: &str = r#"
policies:
  - name: servers
    servers:
      deny: ["evil-*"]
  - name: destructive-ops
    match: { capabilities: ["delete_*"] }
    action: { require_human_approval: true, message: "'{capability_name}' requires approval", log_level: warning }
"#;

fn ok_reply() -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": {"content": [{"type": "text", "text": "ok"}]}})
}

struct Harness {
    router: VirtualRouter,
    transport: Arc<CountingTransport>,
}

fn harness_with(policy: PolicyEnforcer, reply: Value) -> Harness {
    let discovery = Arc::new(DiscoveryRegistry::new());
    discovery
        .register(ServiceDescriptor::local("gnosis", vec!["gnosis-server".to_string()]))
        .unwrap();
    discovery
        .register(ServiceDescriptor::local("evil-service", vec!["evil".to_string()]))
        .unwrap();
    discovery.register(ServiceDescriptor::local("db", vec!["db-server".to_string()])).unwrap();
    discovery.register(ServiceDescriptor::local("empty", Vec::new())).unwrap();
    discovery
        .register(ServiceDescriptor::remote(
            "ext",
            TransportKind::StreamableHttp,
            "http://ext.test/mcp",
        ))
        .unwrap();
    discovery
        .register(ServiceDescriptor::remote("stream", TransportKind::Sse, "http://stream.test/sse"))
        .unwrap();
    discovery.register(ServiceDescriptor::remote("nourl", TransportKind::Sse, "  ")).unwrap();
    discovery
        .register(ServiceDescriptor::remote(
            "ws",
            TransportKind::Other("websocket".to_string()),
            "ws://ws.test",
        ))
        .unwrap();
    let auth = Arc::new(AuthProxy::new());
    let transport = CountingTransport::replying(reply);
    let router = VirtualRouter::new(discovery, Arc::new(policy), auth, transport.clone());
    Harness {
        router,
        transport,
    }
}

fn harness() -> Harness {
    let document = PolicyDocument::from_yaml_str(POLICY).unwrap();
    harness_with(PolicyEnforcer::from_document(&document), ok_reply())
}

async fn forward(harness: &Harness, name: &str) -> ForwardResult {
    harness.router.forward(name, json!({"q": "test"}), Duration::from_secs(5)).await
}

// ============================================================================
// SECTION: Namespace Parsing
// ============================================================================

#[test]
fn split_namespace_uses_first_dot() {
    assert_eq!(split_namespace("gnosis.search"), Some(("gnosis", "search")));
    assert_eq!(split_namespace("a.b.c"), Some(("a", "b.c")));
    assert_eq!(split_namespace("noserver"), None);
    assert_eq!(split_namespace("svc."), None);
    assert_eq!(split_namespace(".cap"), None);
    assert_eq!(split_namespace("."), None);
}

#[test]
fn invalid_names_are_rejected_before_lookup() {
    let h = harness();
    for name in ["noserver", "svc.", ".cap", ""] {
        let err = h.router.route(name).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNamespace, "{name}");
    }
    let err = h.router.route("unknown.cap").unwrap_err();
    assert_eq!(err.code, ErrorCode::ServerNotFound);
    assert_eq!(err.service.as_deref(), Some("unknown"));
}

// ============================================================================
// SECTION: Routing Order
// ============================================================================

#[test]
fn allowed_route_carries_passthrough_context() {
    let h = harness();
    let route = h.router.route("gnosis.search").unwrap();
    assert_eq!(route.service.name, "gnosis");
    assert_eq!(route.capability, "search");
    assert!(route.auth_headers.is_empty());
    assert!(route.policy.is_allowed());
}

#[test]
fn deny_pattern_yields_policy_denied_with_policy_name() {
    let h = harness();
    let err = h.router.route("evil-service.anything").unwrap_err();
    assert_eq!(err.code, ErrorCode::PolicyDenied);
    assert!(err.message.contains("evil-*"));
    assert_eq!(err.detail_str("policy"), Some("servers"));
}

#[test]
fn destructive_capability_yields_approval_required() {
    let h = harness();
    let err = h.router.route("db.delete_all").unwrap_err();
    assert_eq!(err.code, ErrorCode::ApprovalRequired);
    assert!(err.message.contains("delete_all"));
    assert_eq!(err.detail_str("policy"), Some("destructive-ops"));
    assert_eq!(err.detail_str("log_level"), Some("warning"));
}

#[test]
fn missing_static_key_is_auth_failed_missing_credentials() {
    let h = harness();
    h.router.auth().configure_server(AuthConfig::static_key("ext", None));
    assert!(!h.router.auth().authenticate("ext").unwrap().authenticated);
    let err = h.router.route("ext.tool").unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthFailed);
    assert_eq!(err.detail_str("reason"), Some("missing_credentials"));
}

#[test]
fn oauth2_is_auth_failed_not_implemented() {
    let h = harness();
    h.router.auth().configure_server(AuthConfig::new("ext", AuthMode::Oauth2));
    let err = h.router.route("ext.tool").unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthFailed);
    assert_eq!(err.detail_str("reason"), Some("not_implemented"));
    assert_eq!(err.detail_str("mode"), Some("oauth2"));
}

#[test]
fn deny_precedes_auth_failure() {
    let h = harness();
    h.router.auth().configure_server(AuthConfig::static_key("evil-service", None));
    let err = h.router.route("evil-service.x").unwrap_err();
    assert_eq!(err.code, ErrorCode::PolicyDenied);
}

// ============================================================================
// SECTION: Forwarding
// ============================================================================

#[tokio::test]
async fn refused_calls_never_reach_the_transport() {
    let h = harness();
    for name in ["evil-service.anything", "db.delete_all", "nope", "ghost.cap"] {
        let result = forward(&h, name).await;
        assert!(!result.is_ok(), "{name}");
        assert!(result.transport.is_none());
    }
    h.router.auth().configure_server(AuthConfig::static_key("ext", None));
    assert_eq!(forward(&h, "ext.tool").await.error_code(), Some(ErrorCode::AuthFailed));
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn every_transport_kind_has_a_defined_path() {
    let h = harness();
    let local = forward(&h, "gnosis.search").await;
    assert!(local.is_ok());
    assert_eq!(local.transport.as_deref(), Some("stdio"));
    assert_eq!(h.transport.local.load(Ordering::SeqCst), 1);

    assert!(forward(&h, "ext.query").await.is_ok());
    assert!(forward(&h, "stream.query").await.is_ok());
    assert_eq!(h.transport.remote.load(Ordering::SeqCst), 2);

    let other = forward(&h, "ws.query").await;
    assert_eq!(other.error_code(), Some(ErrorCode::UnsupportedTransport));
    assert_eq!(h.transport.calls(), 3);
}

#[tokio::test]
async fn missing_command_and_url_are_detected_without_io() {
    let h = harness();
    let result = forward(&h, "empty.search").await;
    assert_eq!(result.error_code(), Some(ErrorCode::NoCommand));
    let result = forward(&h, "nourl.search").await;
    assert_eq!(result.error_code(), Some(ErrorCode::NoUrl));
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn result_payload_is_returned() {
    let h = harness();
    let result = forward(&h, "gnosis.search").await;
    assert_eq!(result.outcome.unwrap()["content"][0]["text"], "ok");
}

#[tokio::test]
async fn embedded_error_is_jsonrpc_error() {
    let reply = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "bad args"}});
    let h = harness_with(PolicyEnforcer::permissive(), reply);
    let err = forward(&h, "gnosis.search").await.outcome.unwrap_err();
    assert_eq!(err.code, ErrorCode::JsonrpcError);
    assert!(err.message.contains("bad args"));
    assert_eq!(err.details["upstream"]["code"], -32602);
    assert_eq!(err.service.as_deref(), Some("gnosis"));
    assert_eq!(err.capability.as_deref(), Some("search"));
}

#[tokio::test]
async fn null_error_with_result_is_success() {
    let reply = json!({"jsonrpc": "2.0", "id": 1, "result": 5, "error": null});
    let h = harness_with(PolicyEnforcer::permissive(), reply);
    assert_eq!(forward(&h, "gnosis.search").await.outcome.unwrap(), json!(5));
}

#[tokio::test]
async fn zero_timeout_is_raised_to_minimum() {
    let h = harness();
    let _ = h.router.forward("gnosis.search", json!({}), Duration::ZERO).await;
    assert_eq!(*h.transport.seen_timeout.lock().unwrap(), Some(Duration::from_millis(1)));
}

#[tokio::test]
async fn static_key_headers_reach_remote_transport() {
    let h = harness();
    h.router.auth().configure_server(AuthConfig::static_key("ext", Some("k1".to_string())));
    assert!(forward(&h, "ext.query").await.is_ok());
    let headers = h.transport.seen_headers.lock().unwrap().clone();
    assert_eq!(headers, vec![("Authorization".to_string(), "Bearer k1".to_string())]);
}

#[tokio::test]
async fn refusals_and_forwards_are_audited_and_metered() {
    let audit = Arc::new(RecordingAudit::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let document = PolicyDocument::from_yaml_str(POLICY).unwrap();
    let base = harness_with(PolicyEnforcer::from_document(&document), ok_reply());
    let router = base.router.with_audit_sink(audit.clone()).with_metrics(metrics.clone());

    let _ = router.forward("db.delete_all", json!({}), Duration::from_secs(1)).await;
    let _ = router.forward("gnosis.search", json!({}), Duration::from_secs(1)).await;

    let events = audit.events.lock().unwrap();
    let kinds: Vec<&str> = events.iter().map(|event| event.event).collect();
    assert_eq!(kinds, vec!["policy_decision", "forward", "forward"]);
    assert_eq!(events[0].policy_name.as_deref(), Some("destructive-ops"));
    assert_eq!(events[1].error_code, Some(ErrorCode::ApprovalRequired));
    assert_eq!(events[2].transport.as_deref(), Some("stdio"));

    let metered = metrics.events.lock().unwrap();
    assert_eq!(metered[0].outcome, ForwardOutcome::Refused);
    assert_eq!(metered[1].outcome, ForwardOutcome::Ok);
    assert_eq!(metered[1].service.as_deref(), Some("gnosis"));
    assert_eq!(metrics.latencies.load(Ordering::SeqCst), 2);
}

// ============================================================================
// SECTION: Tool Table
// ============================================================================

#[test]
fn tool_table_is_last_writer_wins() {
    let h = harness();
    assert_eq!(h.router.register_tool("gnosis", "search", "v1"), "gnosis.search");
    h.router.register_tool("gnosis", "search", "v2");
    assert_eq!(h.router.tool_count(), 1);
    assert_eq!(h.router.list_tools()[0].description, "v2");
}

#[test]
fn tools_list_by_server_and_unregister() {
    let h = harness();
    assert_eq!(h.router.register_server_tools("gnosis", ["search", "ingest"]), 2);
    h.router.register_tool("sophia", "recall", "Recall notes");
    let gnosis = h.router.list_tools_by_server("gnosis");
    let names: Vec<&str> = gnosis.iter().map(|route| route.namespaced_name.as_str()).collect();
    assert_eq!(names, vec!["gnosis.ingest", "gnosis.search"]);
    assert!(h.router.list_tools_by_server("nobody").is_empty());
    assert!(h.router.unregister_tool("gnosis.ingest"));
    assert!(!h.router.unregister_tool("gnosis.ingest"));
    assert_eq!(h.router.tool_count(), 2);
}

#[test]
fn status_summarizes_components() {
    let h = harness();
    h.router.register_server_tools("gnosis", ["search"]);
    h.router.auth().configure_server(AuthConfig::passthrough("gnosis"));
    let status = h.router.get_status();
    assert_eq!(status.servers_registered, 8);
    assert_eq!(status.tools_registered, 1);
    assert_eq!(status.policies_loaded, 2);
    assert_eq!(status.rate_limiters, 0);
    assert_eq!(status.auth_configs, 1);
    assert_eq!(status.servers.first().map(String::as_str), Some("db"));
    let rendered = serde_json::to_value(&status).unwrap();
    assert_eq!(rendered["servers_registered"], 8);
}
