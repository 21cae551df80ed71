// crates/hgk-gateway-core/src/policy/tests.rs
// ============================================================================
// Module: Policy Enforcer Unit Tests
// Description: Tests for decision ordering, approval rules, and rate limits.
// Purpose: Pin the ordered pipeline and fail-open loading behavior.
// Dependencies: hgk-gateway-core, tempfile
// ============================================================================

//! ## Overview
//! Exercises each pipeline stage, the allow/deny asymmetry, the rate-limit
//! boundary, and fail-open loading of missing or malformed documents.

// ============================================================================
// SECTION: Lint Configuration
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

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use super::PolicyDecision;
use super::PolicyDocument;
use super::PolicyDocumentError;
use super::PolicyEnforcer;
use super::RateLimitWindow;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Mirrors the shipped HGK policy file.
const HGK_POLICY: &str = r#"
policies:
  - name: allowed-servers
    servers:
      allow: [gnosis, sophia, hermeneus, mneme, sympatheia, jules, ochema, digestor, periskope]
      deny: ["*"]
  - name: destructive-ops
    match:
      tools: ["delete_*", "drop_*", "*_destroy"]
    action:
      require_human_approval: true
      message: "'{tool_name}' is destructive and needs approval"
      log_level: warning
  - name: global-rate-limit
    rate_limit:
      requests_per_minute: 60
"#;

/// Parses a YAML document into an enforcer.
fn enforcer(yaml: &str) -> PolicyEnforcer {
    PolicyEnforcer::from_document(&PolicyDocument::from_yaml_str(yaml).unwrap())
}

// ============================================================================
// SECTION: Server List
// ============================================================================

#[test]
fn no_policy_allows_everything() {
    let enforcer = PolicyEnforcer::permissive();
    let result = enforcer.check("anything", "delete_all");
    assert_eq!(result.decision, PolicyDecision::Allow);
    assert_eq!(result.reason, "No server policy defined");
    assert_eq!(enforcer.policy_count(), 0);
}

#[test]
fn allow_list_hits_are_allowed() {
    let enforcer = enforcer(HGK_POLICY);
    let result = enforcer.check("gnosis", "search");
    assert_eq!(result.decision, PolicyDecision::Allow);
}

#[test]
fn deny_glob_blocks_unlisted_service_and_names_pattern() {
    let enforcer = enforcer(HGK_POLICY);
    let result = enforcer.check("unknown", "search");
    assert_eq!(result.decision, PolicyDecision::Deny);
    assert!(result.reason.contains("'*'"));
    assert_eq!(result.policy_name.as_deref(), Some("allowed-servers"));
}

#[test]
fn deny_pattern_matches_prefix_glob() {
    let enforcer = enforcer("policies:\n  - servers:\n      deny: [\"evil-*\"]\n");
    let denied = enforcer.check("evil-service", "anything");
    assert_eq!(denied.decision, PolicyDecision::Deny);
    assert!(denied.reason.contains("evil-*"));
    assert_eq!(denied.policy_name.as_deref(), Some("allowed-servers"));
    assert_eq!(enforcer.check("good-service", "anything").decision, PolicyDecision::Allow);
}

#[test]
fn allow_list_alone_does_not_deny_unlisted_services() {
    let enforcer = enforcer("policies:\n  - name: only\n    servers:\n      allow: [gnosis]\n");
    let result = enforcer.check("sophia", "search");
    assert_eq!(result.decision, PolicyDecision::Allow);
    assert_eq!(result.reason, "Server not explicitly denied");
}

#[test]
fn allow_list_takes_precedence_over_matching_deny() {
    let enforcer = enforcer("policies:\n  - servers:\n      allow: [evil-ok]\n      deny: [\"evil-*\"]\n");
    assert_eq!(enforcer.check("evil-ok", "x").decision, PolicyDecision::Allow);
    assert_eq!(enforcer.check("evil-bad", "x").decision, PolicyDecision::Deny);
}

#[test]
fn last_server_list_wins() {
    let yaml = "policies:\n  - servers:\n      deny: [\"a*\"]\n  - name: second\n    servers:\n      deny: [\"b*\"]\n";
    let enforcer = enforcer(yaml);
    assert_eq!(enforcer.check("alpha", "x").decision, PolicyDecision::Allow);
    let denied = enforcer.check("beta", "x");
    assert_eq!(denied.decision, PolicyDecision::Deny);
    assert_eq!(denied.policy_name.as_deref(), Some("second"));
}

#[test]
fn server_list_reports_allow_set() {
    let enforcer = enforcer(HGK_POLICY);
    let servers = enforcer.get_server_list();
    assert!(servers.contains("gnosis"));
    assert!(servers.contains("sophia"));
    assert!(servers.contains("hermeneus"));
    assert_eq!(enforcer.policy_count(), 3);
    assert_eq!(enforcer.rate_limiter_count(), 1);
}

// ============================================================================
// SECTION: Destructive Operations
// ============================================================================

#[test]
fn destructive_capabilities_require_approval() {
    let enforcer = enforcer(HGK_POLICY);
    for capability in ["delete_all", "drop_table", "cache_destroy"] {
        let result = enforcer.check("gnosis", capability);
        assert_eq!(result.decision, PolicyDecision::RequireApproval, "{capability}");
        assert!(result.message.contains(capability));
        assert_eq!(result.policy_name.as_deref(), Some("destructive-ops"));
        assert_eq!(result.log_level, "warning");
    }
}

#[test]
fn approval_message_accepts_capability_placeholder() {
    let yaml = r#"
policies:
  - name: guard
    match: { capabilities: ["delete_*"] }
    action: { require_human_approval: true, message: "approve {capability_name}?" }
"#;
    let result = enforcer(yaml).check("db", "delete_all");
    assert_eq!(result.decision, PolicyDecision::RequireApproval);
    assert_eq!(result.message, "approve delete_all?");
    assert_eq!(result.log_level, "audit");
}

#[test]
fn approval_default_message_names_capability() {
    let yaml = "policies:\n  - match: { tools: [\"delete_*\"] }\n    action: { require_human_approval: true }\n";
    let result = enforcer(yaml).check("db", "delete_all");
    assert!(result.message.contains("delete_all"));
    assert_eq!(result.policy_name.as_deref(), Some("policy-0"));
}

#[test]
fn non_approval_action_falls_through() {
    let yaml = r#"
policies:
  - name: log-only
    match: { tools: ["delete_*"] }
    action: { require_human_approval: false }
  - name: guard
    match: { tools: ["delete_*"] }
    action: { require_human_approval: true }
"#;
    let result = enforcer(yaml).check("db", "delete_all");
    assert_eq!(result.policy_name.as_deref(), Some("guard"));
}

#[test]
fn server_deny_precedes_approval() {
    let enforcer = enforcer(HGK_POLICY);
    let result = enforcer.check("rogue", "delete_all");
    assert_eq!(result.decision, PolicyDecision::Deny);
}

// ============================================================================
// SECTION: Rate Limits
// ============================================================================

#[test]
fn sixty_first_call_in_window_is_denied() {
    let enforcer = enforcer(HGK_POLICY);
    let start = Instant::now();
    for _ in 0 .. 60 {
        assert!(enforcer.check_at("gnosis", "search", start).is_allowed());
    }
    let denied = enforcer.check_at("gnosis", "search", start);
    assert_eq!(denied.decision, PolicyDecision::Deny);
    assert!(denied.reason.contains("Rate limit"));
    assert_eq!(denied.policy_name.as_deref(), Some("global-rate-limit"));
}

#[test]
fn window_admits_again_after_expiry() {
    let enforcer = enforcer("policies:\n  - name: tight\n    rate_limit:\n      requests_per_minute: 2\n      window_ms: 1000\n");
    let start = Instant::now();
    assert!(enforcer.check_at("a", "b", start).is_allowed());
    assert!(enforcer.check_at("a", "b", start).is_allowed());
    assert!(!enforcer.check_at("a", "b", start + Duration::from_millis(500)).is_allowed());
    assert!(enforcer.check_at("a", "b", start + Duration::from_millis(1001)).is_allowed());
}

#[test]
fn approval_and_denials_do_not_spend_budget() {
    let enforcer = enforcer(HGK_POLICY);
    let start = Instant::now();
    for _ in 0 .. 100 {
        assert_eq!(
            enforcer.check_at("gnosis", "delete_all", start).decision,
            PolicyDecision::RequireApproval
        );
        assert_eq!(enforcer.check_at("rogue", "search", start).decision, PolicyDecision::Deny);
    }
    assert_eq!(enforcer.remaining("global-rate-limit"), Some(60));
}

#[test]
fn refused_call_spends_no_budget_on_other_limiters() {
    let yaml = "policies:\n  - name: small\n    rate_limit: { requests_per_minute: 1 }\n  - name: large\n    rate_limit: { requests_per_minute: 10 }\n";
    let enforcer = enforcer(yaml);
    let start = Instant::now();
    assert!(enforcer.check_at("a", "b", start).is_allowed());
    for _ in 0 .. 5 {
        let denied = enforcer.check_at("a", "b", start);
        assert_eq!(denied.policy_name.as_deref(), Some("small"));
    }
    assert_eq!(enforcer.remaining("large"), Some(9));
}

#[test]
fn concurrent_checks_admit_exactly_the_ceiling() {
    let enforcer = Arc::new(enforcer(
        "policies:\n  - name: shared\n    rate_limit: { requests_per_minute: 50 }\n",
    ));
    let workers: Vec<_> = (0 .. 8)
        .map(|_| {
            let enforcer = Arc::clone(&enforcer);
            thread::spawn(move || {
                (0 .. 100).filter(|_| enforcer.check("s", "c").is_allowed()).count()
            })
        })
        .collect();
    let admitted: usize = workers.into_iter().map(|worker| worker.join().unwrap()).sum();
    assert_eq!(admitted, 50);
    assert_eq!(enforcer.remaining("shared"), Some(0));
}

#[test]
fn zero_ceiling_denies_everything() {
    let enforcer = enforcer("policies:\n  - name: closed\n    rate_limit: { requests_per_minute: 0 }\n");
    assert_eq!(enforcer.check("a", "b").decision, PolicyDecision::Deny);
}

#[test]
fn rate_limit_defaults_to_sixty_per_minute() {
    let enforcer = enforcer("policies:\n  - name: defaulted\n    rate_limit: {}\n");
    assert_eq!(enforcer.remaining("defaulted"), Some(60));
    assert_eq!(enforcer.limiter_names(), vec!["defaulted".to_string()]);
}

#[test]
fn window_evicts_only_expired_entries() {
    let mut window = RateLimitWindow::new(2, Duration::from_secs(10));
    let start = Instant::now();
    assert!(window.check_and_record_at(start));
    assert!(window.check_and_record_at(start + Duration::from_secs(5)));
    assert!(!window.check_and_record_at(start + Duration::from_secs(9)));
    assert!(window.check_and_record_at(start + Duration::from_secs(11)));
    assert_eq!(window.remaining_at(start + Duration::from_secs(11)), 0);
    assert_eq!(window.remaining_at(start + Duration::from_secs(30)), 2);
}

// ============================================================================
// SECTION: Loading
// ============================================================================

#[test]
fn missing_file_loads_permissive_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let enforcer = PolicyEnforcer::load(&dir.path().join("absent.yaml"));
    assert_eq!(enforcer.policy_count(), 0);
    assert!(enforcer.check("anyone", "delete_all").is_allowed());
    assert!(matches!(
        PolicyEnforcer::try_load(&dir.path().join("absent.yaml")),
        Err(PolicyDocumentError::Missing(_))
    ));
}

#[test]
fn malformed_file_loads_permissive_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    fs::write(&path, "policies: [ {name: broken").unwrap();
    let enforcer = PolicyEnforcer::load(&path);
    assert_eq!(enforcer.policy_count(), 0);
    assert!(enforcer.check("anyone", "x").is_allowed());
    assert!(matches!(PolicyEnforcer::try_load(&path), Err(PolicyDocumentError::Parse(_))));
}

#[test]
fn valid_file_loads_rules() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    fs::write(&path, HGK_POLICY).unwrap();
    let enforcer = PolicyEnforcer::load(&path);
    assert_eq!(enforcer.policy_count(), 3);
    assert_eq!(enforcer.check("rogue", "x").decision, PolicyDecision::Deny);
}

#[test]
fn empty_and_null_documents_are_empty() {
    assert!(PolicyDocument::from_yaml_str("").unwrap().policies.is_empty());
    assert!(PolicyDocument::from_yaml_str("policies:\n").unwrap().policies.is_empty());
}

#[test]
fn invalid_window_is_rejected() {
    let result = PolicyDocument::from_yaml_str("policies:\n  - rate_limit: { window_ms: 0 }\n");
    assert!(matches!(result, Err(PolicyDocumentError::Invalid(_))));
}

#[test]
fn oversize_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    fs::write(&path, "#".repeat(super::MAX_POLICY_FILE_SIZE + 1)).unwrap();
    assert!(matches!(PolicyDocument::load(&path), Err(PolicyDocumentError::Invalid(_))));
}
