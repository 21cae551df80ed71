// crates/hgk-gateway-config/src/config.rs
// ============================================================================
// Module: HGK Gateway Configuration
// Description: Configuration loading and validation for the gateway host.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: hgk-gateway-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed.
//! Security posture: config inputs are untrusted; static keys may be supplied
//! through the environment instead of the file and are redacted in `Debug`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use hgk_gateway_core::AuthConfig;
use hgk_gateway_core::AuthMode;
use hgk_gateway_core::DiscoveryConfig;
use hgk_gateway_core::ServiceDescriptor;
use hgk_gateway_core::TransportKind;
use hgk_gateway_core::discovery::DEFAULT_MAX_DOCUMENT_BYTES;
use hgk_gateway_core::discovery::DEFAULT_WELL_KNOWN_PATH;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "hgk-gateway.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "HGK_GATEWAY_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of static services.
pub(crate) const MAX_SERVICES: usize = 256;
/// Maximum number of discovery candidates.
pub(crate) const MAX_DISCOVERY_CANDIDATES: usize = 128;
/// Minimum forward timeout in milliseconds.
pub(crate) const MIN_FORWARD_TIMEOUT_MS: u64 = 1;
/// Maximum forward timeout ceiling in milliseconds.
pub(crate) const MAX_FORWARD_TIMEOUT_MS: u64 = 600_000;
/// Maximum discovery probe timeout in milliseconds.
pub(crate) const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Gateway host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// MCP server transport settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Policy document location.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// Forwarding limits.
    #[serde(default)]
    pub forward: ForwardConfig,
    /// Route audit logging.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Statically configured services.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Per-service auth configuration.
    #[serde(default)]
    pub auth: Vec<AuthEntryConfig>,
    /// Explicit tool routes with descriptions.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    /// Directory of the loaded file, used to resolve relative paths.
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

impl GatewayConfig {
    /// Loads configuration from disk using the standard resolution order:
    /// explicit path, then `HGK_GATEWAY_CONFIG`, then `hgk-gateway.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::from_toml_str(content)?;
        config.source_dir = resolved.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.policy.validate()?;
        self.discovery.validate()?;
        self.forward.validate()?;
        self.audit.validate()?;
        if self.services.len() > MAX_SERVICES {
            return Err(ConfigError::Invalid("too many services configured".to_string()));
        }
        let mut names = BTreeSet::new();
        for service in &self.services {
            service.validate()?;
            if !names.insert(service.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
        }
        let mut auth_services = BTreeSet::new();
        for entry in &self.auth {
            entry.validate()?;
            if !auth_services.insert(entry.service.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate auth entry for service: {}",
                    entry.service
                )));
            }
        }
        for tool in &self.tools {
            tool.validate()?;
        }
        Ok(())
    }

    /// Returns the policy path, resolved against the config file directory.
    #[must_use]
    pub fn policy_path(&self) -> Option<PathBuf> {
        let path = PathBuf::from(self.policy.path.as_deref()?.trim());
        Some(self.resolve_relative(path))
    }

    /// Returns the audit log path, resolved against the config file directory.
    #[must_use]
    pub fn audit_path(&self) -> Option<PathBuf> {
        let path = PathBuf::from(self.audit.path.as_deref()?.trim());
        Some(self.resolve_relative(path))
    }

    /// Joins relative paths onto the config file directory.
    fn resolve_relative(&self, path: PathBuf) -> PathBuf {
        match &self.source_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Transport the gateway itself serves MCP over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerTransport {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
}

impl ServerTransport {
    /// Returns a stable label for the transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Server configuration for the MCP facade.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport type.
    #[serde(default)]
    pub transport: ServerTransport,
    /// Bind address for the HTTP transport.
    #[serde(default)]
    pub bind: Option<String>,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            bind: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Validates server transport configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.transport == ServerTransport::Http {
            self.bind_addr()?;
        }
        Ok(())
    }

    /// Parses the bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address is missing or invalid.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = self
            .bind
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("http transport requires bind".to_string()))?;
        bind.trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address: {bind}")))
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Policy document location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Path to the YAML policy document; permissive when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl PolicyConfig {
    /// Validates the policy path.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("policy.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Discovery settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySettings {
    /// Register the built-in HGK local services at startup.
    #[serde(default = "default_true")]
    pub load_local_defaults: bool,
    /// Discovery document path under each candidate base URL.
    #[serde(default = "default_well_known_path")]
    pub well_known_path: String,
    /// Probe timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Maximum discovery document size in bytes.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    /// Base URLs probed at startup.
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            load_local_defaults: true,
            well_known_path: default_well_known_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_document_bytes: default_max_document_bytes(),
            candidates: Vec::new(),
        }
    }
}

impl DiscoverySettings {
    /// Converts the settings into registry probe settings.
    #[must_use]
    pub fn to_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            well_known_path: self.well_known_path.clone(),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            max_document_bytes: self.max_document_bytes,
        }
    }

    /// Validates discovery settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.well_known_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "discovery.well_known_path must start with '/'".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > MAX_PROBE_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "discovery.probe_timeout_ms must be between 1 and {MAX_PROBE_TIMEOUT_MS}"
            )));
        }
        if self.max_document_bytes == 0 {
            return Err(ConfigError::Invalid(
                "discovery.max_document_bytes must be greater than zero".to_string(),
            ));
        }
        if self.candidates.len() > MAX_DISCOVERY_CANDIDATES {
            return Err(ConfigError::Invalid("too many discovery candidates".to_string()));
        }
        for candidate in &self.candidates {
            validate_http_url("discovery.candidates", candidate)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Forwarding
// ============================================================================

/// Forwarding limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Timeout applied when a caller does not supply one.
    #[serde(default = "default_forward_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Upper bound on caller-supplied timeouts.
    #[serde(default = "default_max_forward_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Maximum backend response size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_forward_timeout_ms(),
            max_timeout_ms: default_max_forward_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl ForwardConfig {
    /// Returns the default timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Clamps a caller timeout into the configured range.
    #[must_use]
    pub fn clamp_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let millis = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .clamp(MIN_FORWARD_TIMEOUT_MS, self.max_timeout_ms.max(MIN_FORWARD_TIMEOUT_MS));
        Duration::from_millis(millis)
    }

    /// Validates forwarding limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_timeout_ms < MIN_FORWARD_TIMEOUT_MS || self.max_timeout_ms > MAX_FORWARD_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "forward.max_timeout_ms must be between {MIN_FORWARD_TIMEOUT_MS} and {MAX_FORWARD_TIMEOUT_MS}"
            )));
        }
        if self.default_timeout_ms < MIN_FORWARD_TIMEOUT_MS
            || self.default_timeout_ms > self.max_timeout_ms
        {
            return Err(ConfigError::Invalid(
                "forward.default_timeout_ms must be positive and within max_timeout_ms".to_string(),
            ));
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "forward.max_response_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Route audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Enable route audit events.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); tracing output otherwise.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Services
// ============================================================================

/// Statically configured backend service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,
    /// Transport label (`stdio`, `streamable-http`, `sse`).
    #[serde(default = "default_service_transport")]
    pub transport: TransportKind,
    /// Program and arguments for local services.
    #[serde(default)]
    pub command: Vec<String>,
    /// URL for remote services.
    #[serde(default)]
    pub url: Option<String>,
    /// Protocol version tag.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Capabilities to advertise and register as tool routes.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Advertised resources.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Declared auth requirement tag.
    #[serde(default)]
    pub auth_requirement: Option<String>,
}

impl ServiceConfig {
    /// Builds the service descriptor.
    #[must_use]
    pub fn to_descriptor(&self) -> ServiceDescriptor {
        let mut descriptor = if self.transport.is_local() {
            ServiceDescriptor::local(self.name.trim(), self.command.clone())
        } else {
            let mut remote = ServiceDescriptor::remote(self.name.trim(), self.transport.clone(), "");
            remote.url = self.url.clone();
            remote.command = self.command.clone();
            remote
        };
        descriptor.capabilities = self.capabilities.iter().cloned().collect();
        descriptor.resources = self.resources.iter().cloned().collect();
        descriptor.auth_requirement.clone_from(&self.auth_requirement);
        if let Some(version) = &self.protocol_version {
            descriptor.protocol_version.clone_from(version);
        }
        descriptor
    }

    /// Validates the service entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if let TransportKind::Other(label) = &self.transport {
            return Err(ConfigError::Invalid(format!(
                "services.{}: unsupported transport '{label}'",
                self.name
            )));
        }
        if self.transport.is_local() && self.url.is_some() {
            return Err(ConfigError::Invalid(format!(
                "services.{}: local services must not set url",
                self.name
            )));
        }
        if let Some(url) = &self.url {
            validate_http_url(&format!("services.{}.url", self.name), url)?;
        }
        self.to_descriptor()
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("services.{}: {err}", self.name)))
    }
}

// ============================================================================
// SECTION: Auth
// ============================================================================

/// Per-service auth entry.
#[derive(Clone, Deserialize)]
pub struct AuthEntryConfig {
    /// Service name.
    pub service: String,
    /// Auth mode.
    #[serde(default)]
    pub mode: AuthMode,
    /// Inline static key.
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable holding the static key.
    #[serde(default)]
    pub key_env: Option<String>,
    /// Header name override.
    #[serde(default)]
    pub header: Option<String>,
}

impl AuthEntryConfig {
    /// Builds the auth config, resolving `key_env` from the environment.
    /// An unset variable leaves the key absent.
    #[must_use]
    pub fn to_auth_config(&self) -> AuthConfig {
        let key = self
            .key
            .clone()
            .or_else(|| self.key_env.as_deref().and_then(|name| env::var(name).ok()));
        AuthConfig {
            service_name: self.service.trim().to_string(),
            mode: self.mode,
            static_key: key,
            header: self.header.clone(),
            extra: BTreeMap::new(),
        }
    }

    /// Validates the auth entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.service must be non-empty".to_string()));
        }
        if self.key.is_some() && self.key_env.is_some() {
            return Err(ConfigError::Invalid(format!(
                "auth.{}: set key or key_env, not both",
                self.service
            )));
        }
        if self.mode != AuthMode::StaticKey && (self.key.is_some() || self.key_env.is_some()) {
            return Err(ConfigError::Invalid(format!(
                "auth.{}: keys are only valid for static_key mode",
                self.service
            )));
        }
        if let Some(header) = &self.header
            && (header.trim().is_empty() || header.contains(char::is_whitespace))
        {
            return Err(ConfigError::Invalid(format!("auth.{}: invalid header name", self.service)));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthEntryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEntryConfig")
            .field("service", &self.service)
            .field("mode", &self.mode)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("key_env", &self.key_env)
            .field("header", &self.header)
            .finish()
    }
}

// ============================================================================
// SECTION: Tools
// ============================================================================

/// Explicit tool route.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    /// Owning service.
    pub service: String,
    /// Bare capability name.
    pub capability: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
}

impl ToolConfig {
    /// Validates the tool entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() || self.service.contains('.') {
            return Err(ConfigError::Invalid(format!("tools: invalid service '{}'", self.service)));
        }
        if self.capability.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "tools.{}: capability must be non-empty",
                self.service
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI input or environment.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an http(s) URL.
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|_| ConfigError::Invalid(format!("{field}: invalid url '{value}'")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!("{field}: url must use http or https")));
    }
    Ok(())
}

/// Default max request body size.
const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Serde helper returning `true`.
const fn default_true() -> bool {
    true
}

/// Default discovery document path.
fn default_well_known_path() -> String {
    DEFAULT_WELL_KNOWN_PATH.to_string()
}

/// Default probe timeout.
const fn default_probe_timeout_ms() -> u64 {
    5_000
}

/// Default discovery document limit.
const fn default_max_document_bytes() -> usize {
    DEFAULT_MAX_DOCUMENT_BYTES
}

/// Default forward timeout.
const fn default_forward_timeout_ms() -> u64 {
    30_000
}

/// Default forward timeout ceiling.
const fn default_max_forward_timeout_ms() -> u64 {
    300_000
}

/// Default backend response limit.
const fn default_max_response_bytes() -> usize {
    4 * 1024 * 1024
}

/// Default transport for configured services.
const fn default_service_transport() -> TransportKind {
    TransportKind::Stdio
}

