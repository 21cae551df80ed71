// crates/hgk-gateway-mcp/src/router.rs
// ============================================================================
// Module: Virtual Router
// Description: Namespaced tool routing and forwarding for the gateway.
// Purpose: Resolve service.capability calls before any backend I/O happens.
// Dependencies: hgk-gateway-core, serde, tracing
// ============================================================================

//! ## Overview
//! The [`VirtualRouter`] is the single entry point for namespaced tool calls.
//! [`VirtualRouter::route`] runs the routing pipeline in a fixed order:
//!
//! 1. Split the name on its first `.` into service and capability.
//! 2. Look the service up in the discovery registry.
//! 3. Ask the policy enforcer for a decision.
//! 4. Ask the auth proxy for credentials.
//!
//! Any failure short-circuits with a [`GatewayError`]. [`VirtualRouter::forward`]
//! only touches a transport after `route` succeeds, which keeps denied and
//! approval-gated calls free of side effects.
//!
//! The router also keeps the table of advertised tool routes. That table is
//! informational: `route` consults the registry, not the tool table, so a
//! capability can be called before it is advertised.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Duration;
use std::time::Instant;

use hgk_gateway_core::AuthError;
use hgk_gateway_core::AuthProxy;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::GatewayError;
use hgk_gateway_core::JsonRpcRequest;
use hgk_gateway_core::JsonRpcResponse;
use hgk_gateway_core::PolicyDecision;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_core::PolicyResult;
use hgk_gateway_core::ServiceDescriptor;
use hgk_gateway_core::TransportKind;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::audit::NoopAuditSink;
use crate::audit::RouteAuditEvent;
use crate::audit::RouteAuditSink;
use crate::telemetry::ForwardMetricEvent;
use crate::telemetry::ForwardMetrics;
use crate::telemetry::ForwardOutcome;
use crate::telemetry::NoopMetrics;
use crate::transport::ForwardTransport;
use crate::transport::LocalCall;
use crate::transport::RemoteCall;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Smallest timeout a forward will use.
pub const MIN_FORWARD_TIMEOUT: Duration = Duration::from_millis(1);

// ============================================================================
// SECTION: Types
// ============================================================================

/// An advertised tool route.
///
/// # Invariants
/// - `namespaced_name` is always `service.capability`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRoute {
    /// Owning service.
    pub service: String,
    /// Bare capability name.
    pub capability: String,
    /// Namespaced name exposed to clients.
    pub namespaced_name: String,
    /// Human description.
    pub description: String,
}

/// A successful routing decision.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Snapshot of the target service.
    pub service: ServiceDescriptor,
    /// Bare capability name.
    pub capability: String,
    /// Headers to attach when forwarding.
    pub auth_headers: BTreeMap<String, String>,
    /// Policy result that allowed the call.
    pub policy: PolicyResult,
}

/// Outcome of one forward attempt.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    /// Namespaced name as requested.
    pub name: String,
    /// Backend `result` payload or the typed failure.
    pub outcome: Result<Value, GatewayError>,
    /// Wall-clock time for routing plus forwarding.
    pub latency: Duration,
    /// Transport label when routing succeeded.
    pub transport: Option<String>,
}

impl ForwardResult {
    /// Returns true when the backend produced a result.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the error code of a failed forward.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.outcome.as_ref().err().map(|err| err.code)
    }
}

/// Gateway status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Services in the discovery registry.
    pub servers_registered: usize,
    /// Advertised tool routes.
    pub tools_registered: usize,
    /// Policy entries loaded.
    pub policies_loaded: usize,
    /// Active rate limiters.
    pub rate_limiters: usize,
    /// Services with explicit auth configuration.
    pub auth_configs: usize,
    /// Registered service names, sorted.
    pub servers: Vec<String>,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Namespaced router over the discovery, policy, and auth components.
///
/// # Invariants
/// - Routing completes before any transport call.
/// - Route table writes are last-writer-wins by namespaced name.
pub struct VirtualRouter {
    /// Service directory.
    discovery: Arc<DiscoveryRegistry>,
    /// Policy decisions.
    policy: Arc<PolicyEnforcer>,
    /// Per-service credentials.
    auth: Arc<AuthProxy>,
    /// Backend I/O.
    transport: Arc<dyn ForwardTransport>,
    /// Audit sink for refusals and forwards.
    audit: Arc<dyn RouteAuditSink>,
    /// Metrics sink for forwards.
    metrics: Arc<dyn ForwardMetrics>,
    /// Advertised tool routes keyed by namespaced name.
    tools: RwLock<BTreeMap<String, ToolRoute>>,
}

impl VirtualRouter {
    /// Creates a router with no-op audit and metrics sinks.
    #[must_use]
    pub fn new(
        discovery: Arc<DiscoveryRegistry>,
        policy: Arc<PolicyEnforcer>,
        auth: Arc<AuthProxy>,
        transport: Arc<dyn ForwardTransport>,
    ) -> Self {
        Self {
            discovery,
            policy,
            auth,
            transport,
            audit: Arc::new(NoopAuditSink),
            metrics: Arc::new(NoopMetrics),
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn RouteAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ForwardMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the discovery registry.
    #[must_use]
    pub const fn discovery(&self) -> &Arc<DiscoveryRegistry> {
        &self.discovery
    }

    /// Returns the policy enforcer.
    #[must_use]
    pub const fn policy(&self) -> &Arc<PolicyEnforcer> {
        &self.policy
    }

    /// Returns the auth proxy.
    #[must_use]
    pub const fn auth(&self) -> &Arc<AuthProxy> {
        &self.auth
    }

    // ------------------------------------------------------------------------
    // Tool table
    // ------------------------------------------------------------------------

    /// Advertises a tool route and returns its namespaced name.
    pub fn register_tool(&self, service: &str, capability: &str, description: &str) -> String {
        let namespaced_name = format!("{service}.{capability}");
        let route = ToolRoute {
            service: service.to_string(),
            capability: capability.to_string(),
            namespaced_name: namespaced_name.clone(),
            description: description.to_string(),
        };
        self.write_tools().insert(namespaced_name.clone(), route);
        namespaced_name
    }

    /// Advertises every capability of a service; returns how many were added.
    pub fn register_server_tools<I, S>(&self, service: &str, capabilities: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        capabilities
            .into_iter()
            .map(|capability| self.register_tool(service, capability.as_ref(), ""))
            .count()
    }

    /// Removes a tool route, returning whether it existed.
    pub fn unregister_tool(&self, namespaced_name: &str) -> bool {
        self.write_tools().remove(namespaced_name).is_some()
    }

    /// Returns all tool routes sorted by namespaced name.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolRoute> {
        self.read_tools().values().cloned().collect()
    }

    /// Returns the tool routes owned by `service`.
    #[must_use]
    pub fn list_tools_by_server(&self, service: &str) -> Vec<ToolRoute> {
        self.read_tools().values().filter(|route| route.service == service).cloned().collect()
    }

    /// Returns the number of advertised tool routes.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.read_tools().len()
    }

    /// Returns a status snapshot across all components.
    #[must_use]
    pub fn get_status(&self) -> GatewayStatus {
        GatewayStatus {
            servers_registered: self.discovery.server_count(),
            tools_registered: self.tool_count(),
            policies_loaded: self.policy.policy_count(),
            rate_limiters: self.policy.rate_limiter_count(),
            auth_configs: self.auth.config_count(),
            servers: self.discovery.names(),
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Resolves a namespaced name into a forwardable route.
    ///
    /// Consults the policy enforcer, so an allowed call spends rate-limit
    /// budget even when it is never forwarded. The CLI `route` command and
    /// `policy check` also spend budget, but only in the enforcer their own
    /// process loads; a running server's windows are untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] with `INVALID_NAMESPACE`,
    /// `SERVER_NOT_FOUND`, `POLICY_DENIED`, `APPROVAL_REQUIRED`, or
    /// `AUTH_FAILED`.
    pub fn route(&self, name: &str) -> Result<ResolvedRoute, GatewayError> {
        let (service, capability) = split_namespace(name).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::InvalidNamespace,
                format!("'{name}' is not a namespaced tool name (expected service.capability)"),
            )
            .with_detail("name", name)
        })?;

        let descriptor = self.discovery.get(service).ok_or_else(|| {
            GatewayError::new(ErrorCode::ServerNotFound, format!("service '{service}' is not registered"))
                .with_target(service, capability)
        })?;

        let policy = self.policy.check(service, capability);
        match policy.decision {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny => {
                self.audit.record(&RouteAuditEvent::policy_decision(name, service, capability, &policy));
                return Err(policy_error(ErrorCode::PolicyDenied, policy.reason.clone(), &policy)
                    .with_target(service, capability));
            }
            PolicyDecision::RequireApproval => {
                self.audit.record(&RouteAuditEvent::policy_decision(name, service, capability, &policy));
                return Err(policy_error(ErrorCode::ApprovalRequired, policy.message.clone(), &policy)
                    .with_target(service, capability));
            }
        }

        let context = self.auth.authenticate(service).map_err(|err| match &err {
            AuthError::NotImplemented {
                mode, ..
            } => GatewayError::new(ErrorCode::AuthFailed, err.to_string())
                .with_target(service, capability)
                .with_detail("reason", "not_implemented")
                .with_detail("mode", mode.as_str()),
        })?;
        if !context.authenticated {
            return Err(GatewayError::new(
                ErrorCode::AuthFailed,
                format!("no credentials available for service '{service}'"),
            )
            .with_target(service, capability)
            .with_detail("reason", "missing_credentials")
            .with_detail("mode", context.mode.as_str()));
        }

        Ok(ResolvedRoute {
            service: descriptor,
            capability: capability.to_string(),
            auth_headers: context.headers,
            policy,
        })
    }

    /// Routes and forwards one tool call.
    ///
    /// Routing failures return without any I/O. The timeout is raised to
    /// [`MIN_FORWARD_TIMEOUT`] when smaller.
    pub async fn forward(&self, name: &str, arguments: Value, timeout: Duration) -> ForwardResult {
        let started = Instant::now();
        let timeout = timeout.max(MIN_FORWARD_TIMEOUT);
        let target = split_namespace(name);
        let (outcome, transport) = match self.route(name) {
            Err(err) => (Err(err), None),
            Ok(route) => {
                let label = route.service.transport.as_str().to_string();
                (self.dispatch(&route, arguments, timeout).await, Some(label))
            }
        };
        let latency = started.elapsed();
        let result = ForwardResult {
            name: name.to_string(),
            outcome,
            latency,
            transport,
        };
        self.observe(&result, target);
        result
    }

    /// Sends the call over the service's transport and decodes the envelope.
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let descriptor = &route.service;
        let capability = route.capability.as_str();
        let request = JsonRpcRequest::tools_call(capability, arguments);
        let response = match &descriptor.transport {
            TransportKind::Stdio => {
                if descriptor.command.is_empty() {
                    return Err(GatewayError::new(
                        ErrorCode::NoCommand,
                        format!("local service '{}' has no command", descriptor.name),
                    )
                    .with_target(&descriptor.name, capability));
                }
                self.transport
                    .call_local(LocalCall {
                        command: &descriptor.command,
                        request: &request,
                        timeout,
                    })
                    .await
            }
            TransportKind::StreamableHttp | TransportKind::Sse => {
                let Some(url) = descriptor.endpoint() else {
                    return Err(GatewayError::new(
                        ErrorCode::NoUrl,
                        format!("remote service '{}' has no url", descriptor.name),
                    )
                    .with_target(&descriptor.name, capability));
                };
                self.transport
                    .call_remote(RemoteCall {
                        url,
                        headers: &route.auth_headers,
                        request: &request,
                        timeout,
                    })
                    .await
            }
            TransportKind::Other(label) => {
                return Err(GatewayError::new(
                    ErrorCode::UnsupportedTransport,
                    format!("transport '{label}' is not supported"),
                )
                .with_target(&descriptor.name, capability)
                .with_detail("transport", label.as_str()));
            }
        };
        let response = response.map_err(|err| err.with_target(&descriptor.name, capability))?;
        decode_response(response).map_err(|err| err.with_target(&descriptor.name, capability))
    }

    /// Logs, audits, and meters a finished forward.
    fn observe(&self, result: &ForwardResult, target: Option<(&str, &str)>) {
        let code = result.error_code();
        match &result.outcome {
            Ok(_) => {
                let latency_ms = u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX);
                debug!(tool = %result.name, latency_ms, "forward succeeded");
            }
            Err(err) if err.code.is_routing() => {
                debug!(tool = %result.name, code = %err.code, "forward refused by routing");
            }
            Err(err) => warn!(tool = %result.name, code = %err.code, error = %err.message, "forward failed"),
        }
        self.audit.record(&RouteAuditEvent::forward(
            &result.name,
            target,
            result.transport.as_deref(),
            code,
            result.latency,
        ));
        let event = ForwardMetricEvent {
            service: target.map(|(service, _)| service.to_string()),
            capability: target.map(|(_, capability)| capability.to_string()),
            transport: result.transport.clone(),
            outcome: ForwardOutcome::from_code(code),
            error_code: code,
        };
        self.metrics.record_forward(&event);
        self.metrics.record_latency(&event, result.latency);
    }

    /// Acquires the tool table read lock, recovering from poisoning.
    fn read_tools(&self) -> RwLockReadGuard<'_, BTreeMap<String, ToolRoute>> {
        self.tools.read().unwrap_or_else(|poisoned| {
            warn!("tool table lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Acquires the tool table write lock, recovering from poisoning.
    fn write_tools(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ToolRoute>> {
        self.tools.write().unwrap_or_else(|poisoned| {
            warn!("tool table lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Splits `service.capability` on the first dot; both sides must be non-empty.
#[must_use]
pub fn split_namespace(name: &str) -> Option<(&str, &str)> {
    let (service, capability) = name.split_once('.')?;
    if service.is_empty() || capability.is_empty() {
        return None;
    }
    Some((service, capability))
}

/// Builds a policy refusal carrying the deciding policy.
fn policy_error(code: ErrorCode, message: String, policy: &PolicyResult) -> GatewayError {
    let mut error = GatewayError::new(code, message)
        .with_detail("reason", policy.reason.as_str())
        .with_detail("log_level", policy.log_level.as_str());
    if let Some(name) = &policy.policy_name {
        error = error.with_detail("policy", name.as_str());
    }
    error
}

/// Extracts the result from an envelope; an embedded error is a failure.
fn decode_response(response: JsonRpcResponse) -> Result<Value, GatewayError> {
    if let Some(upstream) = response.embedded_error() {
        let message = response.error_message().unwrap_or_default();
        return Err(GatewayError::new(ErrorCode::JsonrpcError, format!("backend error: {message}"))
            .with_detail("upstream", upstream.clone()));
    }
    Ok(response.result.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests;
