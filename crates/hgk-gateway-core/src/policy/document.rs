// crates/hgk-gateway-core/src/policy/document.rs
// ============================================================================
// Module: Policy Document
// Description: YAML policy document model and bounded loading.
// Purpose: Parse operator-authored policy files into typed entries.
// Dependencies: serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! A policy document is a YAML mapping with a top-level `policies` list. Each
//! entry may carry a server allow/deny list, a destructive-operation rule
//! (`match` + `action`), a rate limit, or several of these at once.
//! Security posture: policy files are untrusted input with a hard size limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum policy file size in bytes.
pub const MAX_POLICY_FILE_SIZE: usize = 1024 * 1024;
/// Requests-per-minute ceiling used when a rate limit omits one.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
/// Log level attached to destructive-operation actions by default.
pub const DEFAULT_ACTION_LOG_LEVEL: &str = "audit";
/// Maximum accepted limiter window in milliseconds (one day).
const MAX_WINDOW_MS: u64 = 86_400_000;

// ============================================================================
// SECTION: Document Model
// ============================================================================

/// Parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Policy entries in document order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub policies: Vec<PolicyEntry>,
}

/// One policy entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Entry name used in decisions and audit logs.
    #[serde(default)]
    pub name: Option<String>,
    /// Server allow/deny list.
    #[serde(default)]
    pub servers: Option<ServerListSpec>,
    /// Capability match for destructive-operation rules.
    #[serde(default, rename = "match")]
    pub matcher: Option<MatchSpec>,
    /// Action taken when `match` fires.
    #[serde(default)]
    pub action: Option<ActionSpec>,
    /// Named rate limit.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
}

/// Server allow/deny list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerListSpec {
    /// Exact service names that are always allowed.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Glob patterns of denied service names.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Capability match block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Glob patterns over bare capability names.
    #[serde(default, alias = "tools")]
    pub capabilities: Vec<String>,
}

/// Destructive-operation action block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Whether a match requires human approval.
    #[serde(default)]
    pub require_human_approval: bool,
    /// Message template; `{capability_name}` and `{tool_name}` interpolate.
    #[serde(default)]
    pub message: Option<String>,
    /// Log level for audit sinks.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Rate limit block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Admission ceiling per window.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Window override in milliseconds; one minute when absent.
    #[serde(default)]
    pub window_ms: Option<u64>,
}

impl PolicyEntry {
    /// Returns the entry name, or a positional fallback.
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("policy-{index}"), ToString::to_string)
    }
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl PolicyDocument {
    /// Parses a YAML policy document. Blank input yields an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyDocumentError`] when the YAML is malformed or invalid.
    pub fn from_yaml_str(content: &str) -> Result<Self, PolicyDocumentError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: Self =
            serde_yaml::from_str(content).map_err(|err| PolicyDocumentError::Parse(err.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Reads and parses a policy file with size and encoding limits.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyDocumentError::Missing`] when the file does not exist
    /// and another variant for any other failure.
    pub fn load(path: &Path) -> Result<Self, PolicyDocumentError> {
        let bytes = fs::read(path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                PolicyDocumentError::Missing(path.display().to_string())
            } else {
                PolicyDocumentError::Io(err.to_string())
            }
        })?;
        if bytes.len() > MAX_POLICY_FILE_SIZE {
            return Err(PolicyDocumentError::Invalid("policy file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| PolicyDocumentError::Invalid("policy file must be utf-8".to_string()))?;
        Self::from_yaml_str(content)
    }

    /// Validates entry-level constraints.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyDocumentError::Invalid`] for unusable limiter windows or
    /// blank patterns.
    pub fn validate(&self) -> Result<(), PolicyDocumentError> {
        for (index, entry) in self.policies.iter().enumerate() {
            let name = entry.display_name(index);
            if let Some(limit) = &entry.rate_limit
                && let Some(window_ms) = limit.window_ms
                && (window_ms == 0 || window_ms > MAX_WINDOW_MS)
            {
                return Err(PolicyDocumentError::Invalid(format!(
                    "{name}: rate_limit.window_ms must be between 1 and {MAX_WINDOW_MS}"
                )));
            }
            if let Some(servers) = &entry.servers
                && servers.deny.iter().any(|pattern| pattern.trim().is_empty())
            {
                return Err(PolicyDocumentError::Invalid(format!(
                    "{name}: servers.deny patterns must be non-empty"
                )));
            }
            if let Some(matcher) = &entry.matcher
                && matcher.capabilities.iter().any(|pattern| pattern.trim().is_empty())
            {
                return Err(PolicyDocumentError::Invalid(format!(
                    "{name}: match patterns must be non-empty"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy document loading errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyDocumentError {
    /// The policy file does not exist.
    #[error("policy file not found: {0}")]
    Missing(String),
    /// Other I/O failure.
    #[error("policy io error: {0}")]
    Io(String),
    /// YAML parsing failure.
    #[error("policy parse error: {0}")]
    Parse(String),
    /// Structurally valid YAML with unusable values.
    #[error("invalid policy: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Serde Helpers
// ============================================================================

/// Treats an explicit `policies: null` as an empty list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<PolicyEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<PolicyEntry>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Default action log level.
fn default_log_level() -> String {
    DEFAULT_ACTION_LOG_LEVEL.to_string()
}

/// Default rate limit ceiling.
const fn default_requests_per_minute() -> u32 {
    DEFAULT_REQUESTS_PER_MINUTE
}
