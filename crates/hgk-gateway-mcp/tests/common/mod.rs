// crates/hgk-gateway-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared transports and router builders for gateway tests.
// Purpose: Provide reusable test infrastructure for deterministic routing tests.
// Dependencies: hgk-gateway-core, hgk-gateway-mcp
// ============================================================================

//! ## Overview
//! Fixtures here build routers over a counting transport so tests can assert
//! exactly how many backend calls a scenario performed.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use hgk_gateway_core::AuthProxy;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::GatewayError;
use hgk_gateway_core::JsonRpcResponse;
use hgk_gateway_core::PolicyDocument;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_mcp::ForwardTransport;
use hgk_gateway_mcp::LocalCall;
use hgk_gateway_mcp::RemoteCall;
use hgk_gateway_mcp::VirtualRouter;
use serde_json::json;

// ============================================================================
// SECTION: Transports
// ============================================================================

/// Transport that counts invocations and always succeeds.
#[derive(Default)]
pub struct CountingTransport {
    calls: AtomicUsize,
}

impl CountingTransport {
    /// Total backend invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply(&self) -> Result<JsonRpcResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        JsonRpcResponse::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}))
            .ok_or_else(|| GatewayError::new(ErrorCode::InvalidResponse, "fixture"))
    }
}

#[async_trait]
impl ForwardTransport for CountingTransport {
    async fn call_local(&self, _call: LocalCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        self.reply()
    }

    async fn call_remote(&self, _call: RemoteCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        self.reply()
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds an enforcer from inline YAML.
pub fn policy(yaml: &str) -> PolicyEnforcer {
    PolicyEnforcer::from_document(&PolicyDocument::from_yaml_str(yaml).unwrap())
}

/// Builds a router over fresh components and the given transport.
pub fn router_with(
    discovery: Arc<DiscoveryRegistry>,
    policy: PolicyEnforcer,
    transport: Arc<dyn ForwardTransport>,
) -> VirtualRouter {
    VirtualRouter::new(discovery, Arc::new(policy), Arc::new(AuthProxy::new()), transport)
}
