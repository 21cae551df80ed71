//! Namespace parsing property-based tests.
//!
//! ## Purpose
//! Arbitrary tool names must be classified before any registry lookup: a
//! name is well-formed exactly when both sides of its first `.` are
//! non-empty.
//!
//! ## What is covered
//! - Malformed names always yield `INVALID_NAMESPACE`.
//! - Well-formed names for unknown services yield `SERVER_NOT_FOUND`.
//! - No name ever reaches the transport when the registry is empty.
// crates/hgk-gateway-mcp/tests/proptest_namespace.rs
// ============================================================================
// Module: Namespace Property-Based Tests
// Description: Randomized checks for tool name classification.
// Purpose: Ensure namespace errors are decided by name shape alone.
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
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;

use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_mcp::router::split_namespace;
use proptest::prelude::*;

use crate::common::CountingTransport;
use crate::common::router_with;

fn well_formed(name: &str) -> bool {
    name.split_once('.').is_some_and(|(service, capability)| !service.is_empty() && !capability.is_empty())
}

proptest! {
    #[test]
    fn route_classifies_names_by_shape(name in "[a-z.]{0,12}") {
        let transport = Arc::new(CountingTransport::default());
        let router = router_with(
            Arc::new(DiscoveryRegistry::new()),
            PolicyEnforcer::permissive(),
            transport.clone(),
        );
        let err = router.route(&name).unwrap_err();
        if well_formed(&name) {
            prop_assert_eq!(err.code, ErrorCode::ServerNotFound);
        } else {
            prop_assert_eq!(err.code, ErrorCode::InvalidNamespace);
        }
        prop_assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn split_keeps_everything_after_the_first_dot(
        service in "[a-z-]{1,8}",
        capability in "[a-z_.]{1,12}",
    ) {
        let name = format!("{service}.{capability}");
        prop_assert_eq!(split_namespace(&name), Some((service.as_str(), capability.as_str())));
    }
}
