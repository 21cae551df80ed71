// crates/hgk-gateway-core/src/lib.rs
// ============================================================================
// Module: HGK Gateway Core
// Description: Service directory, policy engine, and auth context for the gateway.
// Purpose: Provide the transport-free building blocks of namespaced MCP routing.
// Dependencies: glob-match, reqwest, serde, serde_yaml, thiserror, tracing
// ============================================================================

//! ## Overview
//! `hgk-gateway-core` holds the three leaf components of the HGK MCP gateway:
//! the [`DiscoveryRegistry`] of backend services, the [`PolicyEnforcer`] that
//! turns a `(service, capability)` pair into a decision, and the [`AuthProxy`]
//! that produces per-service authentication headers. It also defines the
//! shared [`GatewayError`] taxonomy and the JSON-RPC envelopes exchanged with
//! backends. Forwarding over real transports lives in `hgk-gateway-mcp`.
//!
//! Security posture: policy and discovery inputs are untrusted; policy loading
//! fails open loudly, everything else fails closed with a typed error.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod jsonrpc;
pub mod policy;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::AuthConfig;
pub use auth::AuthContext;
pub use auth::AuthError;
pub use auth::AuthMode;
pub use auth::AuthProxy;
pub use descriptor::ServiceDescriptor;
pub use descriptor::TransportKind;
pub use discovery::DiscoveryConfig;
pub use discovery::DiscoveryError;
pub use discovery::DiscoveryRegistry;
pub use error::ErrorCode;
pub use error::GatewayError;
pub use jsonrpc::JsonRpcRequest;
pub use jsonrpc::JsonRpcResponse;
pub use policy::PolicyDecision;
pub use policy::PolicyDocument;
pub use policy::PolicyDocumentError;
pub use policy::PolicyEnforcer;
pub use policy::PolicyResult;
pub use policy::RateLimitWindow;
