// crates/hgk-gateway-mcp/src/telemetry.rs
// ============================================================================
// Module: Forward Telemetry
// Description: Observability hooks for routed and forwarded tool calls.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: hgk-gateway-core
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for forward counters and
//! latency histograms. Deployments plug in their own exporter by implementing
//! [`ForwardMetrics`].
//! Security posture: labels are service and capability names only; arguments
//! and responses never reach the metrics sink.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use hgk_gateway_core::ErrorCode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for forward histograms.
pub const FORWARD_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Forward outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ForwardOutcome {
    /// Backend returned a result.
    Ok,
    /// Routing refused the call before any I/O.
    Refused,
    /// Forwarding failed after routing succeeded.
    Error,
}

impl ForwardOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Refused => "refused",
            Self::Error => "error",
        }
    }

    /// Classifies a forward result by its error code.
    #[must_use]
    pub const fn from_code(code: Option<ErrorCode>) -> Self {
        match code {
            None => Self::Ok,
            Some(code) if code.is_routing() => Self::Refused,
            Some(_) => Self::Error,
        }
    }
}

/// Forward metric event payload.
///
/// # Invariants
/// - `service` and `capability` are `None` when the name did not parse.
#[derive(Debug, Clone)]
pub struct ForwardMetricEvent {
    /// Target service.
    pub service: Option<String>,
    /// Bare capability name.
    pub capability: Option<String>,
    /// Transport label when routing succeeded.
    pub transport: Option<String>,
    /// Outcome classification.
    pub outcome: ForwardOutcome,
    /// Error code when the call failed.
    pub error_code: Option<ErrorCode>,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for forwarded calls.
pub trait ForwardMetrics: Send + Sync {
    /// Records a forward counter event.
    fn record_forward(&self, event: &ForwardMetricEvent);
    /// Records a latency observation for the forward.
    fn record_latency(&self, event: &ForwardMetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
pub struct NoopMetrics;

impl ForwardMetrics for NoopMetrics {
    fn record_forward(&self, _event: &ForwardMetricEvent) {}

    fn record_latency(&self, _event: &ForwardMetricEvent, _latency: Duration) {}
}
