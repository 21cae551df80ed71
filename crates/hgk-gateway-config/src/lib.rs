// crates/hgk-gateway-config/src/lib.rs
// ============================================================================
// Module: HGK Gateway Config Library
// Description: Canonical gateway configuration model and validation.
// Purpose: Single source of truth for hgk-gateway.toml semantics.
// Dependencies: hgk-gateway-core, serde, toml
// ============================================================================

//! ## Overview
//! `hgk-gateway-config` defines the TOML configuration for the gateway host:
//! server transport, policy file location, discovery settings, forwarding
//! limits, static services, per-service auth, and explicit tool routes.
//! Loading is strict and fails closed; only the referenced policy document is
//! loaded fail-open, by the policy enforcer.
//!
//! Security posture: config inputs are untrusted and size-limited.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
