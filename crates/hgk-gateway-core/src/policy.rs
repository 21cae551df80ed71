// crates/hgk-gateway-core/src/policy.rs
// ============================================================================
// Module: Policy Enforcer
// Description: Ordered allow/deny, approval, and rate-limit decisions.
// Purpose: Turn a (service, capability) pair into a deterministic decision.
// Dependencies: glob-match, serde, tracing
// ============================================================================

//! ## Overview
//! [`PolicyEnforcer::check`] runs a fixed pipeline:
//! 1. server allow/deny list,
//! 2. destructive-operation approval rules in document order,
//! 3. named rate limiters in document order,
//! 4. allow.
//!
//! The allow list never denies on its own: a service that is neither allowed
//! nor matched by a deny glob passes step 1. Only calls that reach step 3
//! spend rate-limit budget, and a call refused by one limiter spends none.
//!
//! Security posture: loading is fail-open. A missing or malformed policy file
//! is logged at `warn` and yields a permissive enforcer; use
//! [`PolicyEnforcer::try_load`] where a hard failure is wanted.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod document;
mod rate_limit;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use glob_match::glob_match;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

pub use self::document::ActionSpec;
pub use self::document::DEFAULT_ACTION_LOG_LEVEL;
pub use self::document::DEFAULT_REQUESTS_PER_MINUTE;
pub use self::document::MAX_POLICY_FILE_SIZE;
pub use self::document::MatchSpec;
pub use self::document::PolicyDocument;
pub use self::document::PolicyDocumentError;
pub use self::document::PolicyEntry;
pub use self::document::RateLimitSpec;
pub use self::document::ServerListSpec;
pub use self::rate_limit::DEFAULT_RATE_LIMIT_WINDOW;
pub use self::rate_limit::RateLimitWindow;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Policy name reported when the server list entry is unnamed.
const DEFAULT_SERVER_LIST_NAME: &str = "allowed-servers";
/// Log level attached to non-approval results.
const DEFAULT_RESULT_LOG_LEVEL: &str = "info";
/// Approval message used when an action omits its template.
const DEFAULT_APPROVAL_MESSAGE: &str = "'{capability_name}' requires human approval";

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// The call may proceed.
    Allow,
    /// The call is refused.
    Deny,
    /// The call needs a human to approve it first.
    RequireApproval,
}

impl PolicyDecision {
    /// Returns a stable label for the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }
}

/// Detailed outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyResult {
    /// Decision reached.
    pub decision: PolicyDecision,
    /// Human-readable reason.
    pub reason: String,
    /// Policy entry that produced the decision, if any.
    pub policy_name: Option<String>,
    /// Log level for audit sinks.
    pub log_level: String,
    /// Rendered approval message; empty for other decisions.
    pub message: String,
}

impl PolicyResult {
    /// Builds an allow result.
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyDecision::Allow,
            reason: reason.into(),
            policy_name: None,
            log_level: DEFAULT_RESULT_LOG_LEVEL.to_string(),
            message: String::new(),
        }
    }

    /// Builds a deny result attributed to `policy_name`.
    fn deny(reason: String, policy_name: &str) -> Self {
        Self {
            decision: PolicyDecision::Deny,
            reason,
            policy_name: Some(policy_name.to_string()),
            log_level: DEFAULT_RESULT_LOG_LEVEL.to_string(),
            message: String::new(),
        }
    }

    /// Returns true for [`PolicyDecision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == PolicyDecision::Allow
    }
}

// ============================================================================
// SECTION: Compiled Rules
// ============================================================================

/// Effective server allow/deny list.
#[derive(Debug, Clone)]
struct ServerList {
    /// Entry name.
    name: String,
    /// Exact allowed names.
    allow: BTreeSet<String>,
    /// Denied name globs.
    deny: Vec<String>,
}

/// Destructive-operation rule.
#[derive(Debug, Clone)]
struct DestructiveRule {
    /// Entry name.
    name: String,
    /// Capability globs.
    patterns: Vec<String>,
    /// Whether a match requires approval.
    require_human_approval: bool,
    /// Message template.
    message: String,
    /// Audit log level.
    log_level: String,
}

/// Named sliding-window limiter.
#[derive(Debug)]
struct NamedLimiter {
    /// Entry name.
    name: String,
    /// Window guarded by its own lock.
    window: Mutex<RateLimitWindow>,
}

// ============================================================================
// SECTION: Enforcer
// ============================================================================

/// Declarative policy engine.
///
/// # Invariants
/// - Rules are immutable after construction; only limiter windows change.
/// - Limiters are always locked in document order.
#[derive(Debug, Default)]
pub struct PolicyEnforcer {
    /// Effective server list; the last one in the document wins.
    server_list: Option<ServerList>,
    /// Destructive-operation rules in document order.
    destructive: Vec<DestructiveRule>,
    /// Rate limiters in document order.
    limiters: Vec<NamedLimiter>,
    /// Number of document entries.
    policy_count: usize,
}

impl PolicyEnforcer {
    /// Returns an enforcer with no rules; every check allows.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Compiles a parsed policy document.
    #[must_use]
    pub fn from_document(document: &PolicyDocument) -> Self {
        let mut enforcer = Self {
            policy_count: document.policies.len(),
            ..Self::default()
        };
        for (index, entry) in document.policies.iter().enumerate() {
            let name = entry.display_name(index);
            if let Some(servers) = &entry.servers {
                let list_name = if entry.name.is_some() {
                    name.clone()
                } else {
                    DEFAULT_SERVER_LIST_NAME.to_string()
                };
                enforcer.server_list = Some(ServerList {
                    name: list_name,
                    allow: servers.allow.iter().cloned().collect(),
                    deny: servers.deny.clone(),
                });
            }
            if let (Some(matcher), Some(action)) = (&entry.matcher, &entry.action) {
                enforcer.destructive.push(DestructiveRule {
                    name: name.clone(),
                    patterns: matcher.capabilities.clone(),
                    require_human_approval: action.require_human_approval,
                    message: action
                        .message
                        .clone()
                        .unwrap_or_else(|| DEFAULT_APPROVAL_MESSAGE.to_string()),
                    log_level: action.log_level.clone(),
                });
            }
            if let Some(limit) = &entry.rate_limit {
                let window = limit.window_ms.map_or(DEFAULT_RATE_LIMIT_WINDOW, Duration::from_millis);
                enforcer.insert_limiter(name, RateLimitWindow::new(limit.requests_per_minute, window));
            }
        }
        enforcer
    }

    /// Loads a policy file, falling back to permissive defaults on failure.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(enforcer) => enforcer,
            Err(PolicyDocumentError::Missing(path)) => {
                warn!(path = %path, "policy file not found; using permissive defaults");
                Self::permissive()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "policy file unusable; using permissive defaults");
                Self::permissive()
            }
        }
    }

    /// Loads a policy file, failing on any error.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyDocumentError`] when the file is missing or invalid.
    pub fn try_load(path: &Path) -> Result<Self, PolicyDocumentError> {
        let document = PolicyDocument::load(path)?;
        let enforcer = Self::from_document(&document);
        info!(
            path = %path.display(),
            policies = enforcer.policy_count,
            allowed_servers = enforcer.get_server_list().len(),
            rate_limiters = enforcer.limiters.len(),
            "loaded gateway policies"
        );
        Ok(enforcer)
    }

    /// Evaluates a call now.
    #[must_use]
    pub fn check(&self, service: &str, capability: &str) -> PolicyResult {
        self.check_at(service, capability, Instant::now())
    }

    /// Evaluates a call as if it arrived at `now`.
    #[must_use]
    pub fn check_at(&self, service: &str, capability: &str, now: Instant) -> PolicyResult {
        let server = self.check_server(service);
        if server.decision == PolicyDecision::Deny {
            return server;
        }
        if let Some(approval) = self.check_destructive(capability) {
            return approval;
        }
        if let Some(limited) = self.check_rate_limits(now) {
            return limited;
        }
        PolicyResult::allow("All policies passed")
    }

    /// Returns the configured allow set.
    #[must_use]
    pub fn get_server_list(&self) -> BTreeSet<String> {
        self.server_list.as_ref().map(|list| list.allow.clone()).unwrap_or_default()
    }

    /// Returns the number of loaded document entries.
    #[must_use]
    pub const fn policy_count(&self) -> usize {
        self.policy_count
    }

    /// Returns the number of named rate limiters.
    #[must_use]
    pub const fn rate_limiter_count(&self) -> usize {
        self.limiters.len()
    }

    /// Returns limiter names in document order.
    #[must_use]
    pub fn limiter_names(&self) -> Vec<String> {
        self.limiters.iter().map(|limiter| limiter.name.clone()).collect()
    }

    /// Returns the unused budget of a named limiter.
    #[must_use]
    pub fn remaining(&self, limiter: &str) -> Option<u32> {
        let now = Instant::now();
        self.limiters
            .iter()
            .find(|candidate| candidate.name == limiter)
            .map(|candidate| lock_window(&candidate.window).remaining_at(now))
    }

    /// Step 1: server allow/deny list.
    fn check_server(&self, service: &str) -> PolicyResult {
        let Some(list) = self.server_list.as_ref().filter(|list| !list.allow.is_empty() || !list.deny.is_empty())
        else {
            return PolicyResult::allow("No server policy defined");
        };
        if list.allow.contains(service) {
            return PolicyResult::allow(format!("Server '{service}' is allowed"));
        }
        if let Some(pattern) = list.deny.iter().find(|pattern| glob_match(pattern, service)) {
            return PolicyResult::deny(
                format!("Server '{service}' denied by pattern '{pattern}'"),
                &list.name,
            );
        }
        PolicyResult::allow("Server not explicitly denied")
    }

    /// Step 2: first matching approval rule.
    fn check_destructive(&self, capability: &str) -> Option<PolicyResult> {
        let rule = self.destructive.iter().find(|rule| {
            rule.require_human_approval
                && rule.patterns.iter().any(|pattern| glob_match(pattern, capability))
        })?;
        Some(PolicyResult {
            decision: PolicyDecision::RequireApproval,
            reason: format!("Policy '{}' requires approval", rule.name),
            policy_name: Some(rule.name.clone()),
            log_level: rule.log_level.clone(),
            message: render_message(&rule.message, capability),
        })
    }

    /// Step 3: limiters, checked together and recorded only if all admit.
    fn check_rate_limits(&self, now: Instant) -> Option<PolicyResult> {
        let mut guards: Vec<(&NamedLimiter, MutexGuard<'_, RateLimitWindow>)> =
            self.limiters.iter().map(|limiter| (limiter, lock_window(&limiter.window))).collect();
        for (limiter, window) in &mut guards {
            window.evict_expired(now);
            if window.is_full() {
                return Some(PolicyResult::deny(
                    format!(
                        "Rate limit exceeded ({})",
                        describe_ceiling(window.max_count(), window.window())
                    ),
                    &limiter.name,
                ));
            }
        }
        for (_, window) in &mut guards {
            window.record(now);
        }
        None
    }

    /// Adds a limiter, replacing one with the same name in place.
    fn insert_limiter(&mut self, name: String, window: RateLimitWindow) {
        if let Some(existing) = self.limiters.iter_mut().find(|limiter| limiter.name == name) {
            existing.window = Mutex::new(window);
            return;
        }
        self.limiters.push(NamedLimiter {
            name,
            window: Mutex::new(window),
        });
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Interpolates the capability name into an approval template.
fn render_message(template: &str, capability: &str) -> String {
    template.replace("{capability_name}", capability).replace("{tool_name}", capability)
}

/// Formats a limiter ceiling as `N/min` or `N/<ms>ms`.
fn describe_ceiling(max_count: u32, window: Duration) -> String {
    if window == DEFAULT_RATE_LIMIT_WINDOW {
        format!("{max_count}/min")
    } else {
        format!("{max_count}/{}ms", window.as_millis())
    }
}

/// Locks a limiter window, recovering from poisoning.
fn lock_window(window: &Mutex<RateLimitWindow>) -> MutexGuard<'_, RateLimitWindow> {
    window.lock().unwrap_or_else(|poisoned| {
        warn!("rate limiter lock poisoned; recovering");
        PoisonError::into_inner(poisoned)
    })
}

#[cfg(test)]
mod tests;
