// crates/hgk-gateway-mcp/tests/scenarios.rs
// ============================================================================
// Module: Gateway Scenario Tests
// Description: End-to-end routing scenarios across all four components.
// Purpose: Exercise registry, policy, auth, and router together.
// Dependencies: hgk-gateway-core, hgk-gateway-mcp, tokio
// ============================================================================

//! ## Overview
//! Each test wires a real discovery registry, policy enforcer, and auth proxy
//! behind a router, then drives one user-visible flow through it.

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

mod common;

use std::sync::Arc;
use std::time::Duration;

use hgk_gateway_core::AuthConfig;
use hgk_gateway_core::DiscoveryConfig;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::PolicyDecision;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_core::ServiceDescriptor;
use serde_json::json;

use crate::common::CountingTransport;
use crate::common::policy;
use crate::common::router_with;

// ============================================================================
// SECTION: Scenarios
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn local_service_without_policy_is_forwarded_to_a_subprocess() {
    use hgk_gateway_mcp::ProcessHttpTransport;
    use hgk_gateway_mcp::transport::DEFAULT_MAX_RESPONSE_BYTES;

    let script = concat!(
        "read request; ",
        "case \"$request\" in *'\"q\":\"test\"'*) ;; *) exit 9 ;; esac; ",
        "printf '%s\\n' '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"found\"}]}}'"
    );
    let discovery = Arc::new(DiscoveryRegistry::new());
    discovery
        .register(ServiceDescriptor::local(
            "gnosis",
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        ))
        .unwrap();
    let transport = Arc::new(ProcessHttpTransport::new(DEFAULT_MAX_RESPONSE_BYTES).unwrap());
    let router = router_with(discovery, PolicyEnforcer::permissive(), transport);

    let route = router.route("gnosis.search").unwrap();
    assert!(route.policy.is_allowed());
    assert!(route.auth_headers.is_empty());

    let result = router.forward("gnosis.search", json!({"q": "test"}), Duration::from_secs(10)).await;
    assert_eq!(result.transport.as_deref(), Some("stdio"));
    assert_eq!(result.outcome.unwrap()["content"][0]["text"], "found");
}

#[test]
fn deny_pattern_blocks_matching_service() {
    let enforcer = policy("policies:\n  - name: blocklist\n    servers:\n      deny: [\"evil-*\"]\n");
    let result = enforcer.check("evil-service", "anything");
    assert_eq!(result.decision, PolicyDecision::Deny);
    assert!(result.reason.contains("evil-*"));
    assert_eq!(result.policy_name.as_deref(), Some("blocklist"));
}

#[tokio::test]
async fn destructive_capability_requires_approval_without_io() {
    let discovery = Arc::new(DiscoveryRegistry::new());
    let mut db = ServiceDescriptor::local("db", vec!["db-server".to_string()]);
    db.capabilities.insert("delete_all".to_string());
    discovery.register(db).unwrap();
    let transport = Arc::new(CountingTransport::default());
    let router = router_with(
        discovery,
        policy(concat!(
            "policies:\n",
            "  - name: destructive\n",
            "    match: { capabilities: [\"delete_*\"] }\n",
            "    action: { require_human_approval: true }\n",
        )),
        transport.clone(),
    );

    let result = router.policy().check("db", "delete_all");
    assert_eq!(result.decision, PolicyDecision::RequireApproval);
    assert!(result.message.contains("delete_all"));

    let forwarded = router.forward("db.delete_all", json!({}), Duration::from_secs(1)).await;
    assert_eq!(forwarded.error_code(), Some(ErrorCode::ApprovalRequired));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn static_key_without_key_fails_auth() {
    let discovery = Arc::new(DiscoveryRegistry::new());
    discovery
        .register(ServiceDescriptor::remote(
            "ext",
            hgk_gateway_core::TransportKind::StreamableHttp,
            "http://ext.invalid/mcp",
        ))
        .unwrap();
    let transport = Arc::new(CountingTransport::default());
    let router = router_with(discovery, PolicyEnforcer::permissive(), transport.clone());
    router.auth().configure_server(AuthConfig::static_key("ext", None));

    assert!(!router.auth().authenticate("ext").unwrap().authenticated);
    let err = router.route("ext.tool").unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthFailed);
    let forwarded = router.forward("ext.tool", json!({}), Duration::from_secs(1)).await;
    assert_eq!(forwarded.error_code(), Some(ErrorCode::AuthFailed));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn local_service_without_command_is_no_command() {
    let discovery = Arc::new(DiscoveryRegistry::new());
    discovery.register(ServiceDescriptor::local("hollow", Vec::new())).unwrap();
    let transport = Arc::new(CountingTransport::default());
    let router = router_with(discovery, PolicyEnforcer::permissive(), transport.clone());

    let result = router.forward("hollow.run", json!({}), Duration::from_secs(1)).await;
    assert_eq!(result.error_code(), Some(ErrorCode::NoCommand));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn unreachable_discovery_returns_none_and_leaves_registry_unchanged() {
    let registry = DiscoveryRegistry::with_config(DiscoveryConfig {
        probe_timeout: Duration::from_millis(500),
        ..DiscoveryConfig::default()
    });
    registry.register(ServiceDescriptor::local("gnosis", vec!["gnosis-server".to_string()])).unwrap();
    let before = registry.servers();

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    assert!(registry.discover(&url).await.is_none());
    assert!(registry.discover("not a url").await.is_none());
    assert_eq!(registry.servers(), before);
}
