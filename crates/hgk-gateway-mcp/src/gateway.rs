// crates/hgk-gateway-mcp/src/gateway.rs
// ============================================================================
// Module: Gateway Composition
// Description: Builds the router and its components from gateway config.
// Purpose: Explicit, testable wiring in place of a process-wide instance.
// Dependencies: hgk-gateway-config, hgk-gateway-core, tracing
// ============================================================================

//! ## Overview
//! [`Gateway::from_config`] assembles the discovery registry, policy enforcer,
//! auth proxy, transport, and audit sink, registers configured services and
//! their tool routes, and hands back one owned value. Each host process builds
//! its own gateway; nothing is global.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use hgk_gateway_config::ForwardConfig;
use hgk_gateway_config::GatewayConfig;
use hgk_gateway_core::AuthProxy;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_core::ServiceDescriptor;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::RouteAuditSink;
use crate::audit::TracingAuditSink;
use crate::router::ForwardResult;
use crate::router::GatewayStatus;
use crate::router::VirtualRouter;
use crate::server::McpServerError;
use crate::transport::ForwardTransport;
use crate::transport::ProcessHttpTransport;

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// A fully wired gateway.
pub struct Gateway {
    /// Router over all components.
    router: Arc<VirtualRouter>,
    /// Forwarding limits.
    forward: ForwardConfig,
    /// Discovery base URLs probed by [`Gateway::discover_candidates`].
    candidates: Vec<String>,
}

impl Gateway {
    /// Builds a gateway with the production transport.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when config is invalid or a component cannot
    /// be initialized.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, McpServerError> {
        let transport = ProcessHttpTransport::new(config.forward.max_response_bytes)
            .map_err(|err| McpServerError::Init(err.to_string()))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Builds a gateway over an injected transport.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when config is invalid or a component cannot
    /// be initialized.
    pub fn with_transport(
        config: &GatewayConfig,
        transport: Arc<dyn ForwardTransport>,
    ) -> Result<Self, McpServerError> {
        config.validate().map_err(|err| McpServerError::Config(err.to_string()))?;

        let discovery = Arc::new(DiscoveryRegistry::with_config(config.discovery.to_discovery_config()));
        if config.discovery.load_local_defaults {
            let count = discovery.register_local_defaults();
            info!(count, "registered built-in local services");
        }
        for service in &config.services {
            discovery
                .register(service.to_descriptor())
                .map_err(|err| McpServerError::Config(err.to_string()))?;
        }

        let policy = match config.policy_path() {
            Some(path) => PolicyEnforcer::load(&path),
            None => PolicyEnforcer::permissive(),
        };

        let auth = Arc::new(AuthProxy::new());
        for entry in &config.auth {
            auth.configure_server(entry.to_auth_config());
        }

        let router = VirtualRouter::new(Arc::clone(&discovery), Arc::new(policy), auth, transport)
            .with_audit_sink(build_audit_sink(config)?);
        for descriptor in discovery.servers().values() {
            register_descriptor_tools(&router, descriptor);
        }
        for tool in &config.tools {
            router.register_tool(tool.service.trim(), tool.capability.trim(), &tool.description);
        }

        Ok(Self {
            router: Arc::new(router),
            forward: config.forward.clone(),
            candidates: config.discovery.candidates.clone(),
        })
    }

    /// Returns the router.
    #[must_use]
    pub const fn router(&self) -> &Arc<VirtualRouter> {
        &self.router
    }

    /// Returns the forwarding limits.
    #[must_use]
    pub const fn forward_config(&self) -> &ForwardConfig {
        &self.forward
    }

    /// Probes configured discovery candidates and advertises their tools.
    /// Returns the number of services discovered.
    pub async fn discover_candidates(&self) -> usize {
        if self.candidates.is_empty() {
            return 0;
        }
        let found = self.router.discovery().discover_all(self.candidates.iter().map(String::as_str)).await;
        for descriptor in &found {
            register_descriptor_tools(&self.router, descriptor);
        }
        if found.len() < self.candidates.len() {
            warn!(
                probed = self.candidates.len(),
                found = found.len(),
                "some discovery candidates did not answer"
            );
        }
        found.len()
    }

    /// Forwards a call, clamping the caller timeout to the configured range.
    pub async fn call(&self, name: &str, arguments: Value, timeout_ms: Option<u64>) -> ForwardResult {
        let timeout: Duration = self.forward.clamp_timeout(timeout_ms);
        self.router.forward(name, arguments, timeout).await
    }

    /// Returns a status snapshot.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        self.router.get_status()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Advertises every capability a descriptor lists.
fn register_descriptor_tools(router: &VirtualRouter, descriptor: &ServiceDescriptor) {
    router.register_server_tools(&descriptor.name, &descriptor.capabilities);
}

/// Selects the audit sink from config.
fn build_audit_sink(config: &GatewayConfig) -> Result<Arc<dyn RouteAuditSink>, McpServerError> {
    if !config.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match config.audit_path() {
        Some(path) => {
            let sink = FileAuditSink::new(&path).map_err(|err| {
                McpServerError::Init(format!("audit log {}: {err}", path.display()))
            })?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(TracingAuditSink)),
    }
}
