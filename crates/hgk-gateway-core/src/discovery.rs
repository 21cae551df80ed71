// crates/hgk-gateway-core/src/discovery.rs
// ============================================================================
// Module: Discovery Registry
// Description: Directory of backend services and well-known endpoint probing.
// Purpose: Own the authoritative service name to descriptor mapping.
// Dependencies: reqwest, serde, serde_json, tracing, url
// ============================================================================

//! ## Overview
//! The [`DiscoveryRegistry`] is a directory, not a health check: static
//! registration never touches the network. Remote services can also be found
//! by probing `/.well-known/mcp.json` under a candidate base URL; a failed
//! probe is logged and reported as `None` so a bulk sweep keeps going.
//!
//! Security posture: discovery documents are untrusted and size-limited.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::descriptor::ServiceDescriptor;
use crate::descriptor::TransportKind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Conventional discovery document path under a base URL.
pub const DEFAULT_WELL_KNOWN_PATH: &str = "/.well-known/mcp.json";
/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default maximum discovery document size in bytes.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 256 * 1024;

/// Built-in HGK local services: `(name, python module, capabilities)`.
const LOCAL_DEFAULTS: &[(&str, &str, &[&str])] = &[
    ("gnosis", "mekhane.mcp.gnosis_mcp_server", &["search", "stats", "recommend_model"]),
    ("sophia", "mekhane.mcp.sophia_mcp_server", &["search", "backlinks", "graph_stats"]),
    ("hermeneus", "mekhane.mcp.hermeneus_mcp_server", &["run", "compile", "dispatch", "audit"]),
    ("mneme", "mekhane.mcp.mneme_server", &["search", "sources", "stats"]),
    ("sympatheia", "mekhane.mcp.sympatheia_mcp_server", &["attractor", "feedback", "status"]),
    ("jules", "mekhane.mcp.jules_mcp_server", &["create_task", "get_status", "list_repos"]),
    ("ochema", "mekhane.mcp.ochema_mcp_server", &["ask", "models", "status"]),
    ("digestor", "mekhane.mcp.digestor_mcp_server", &["run", "topics", "check_incoming"]),
    ("periskope", "mekhane.mcp.periskope_mcp_server", &["research", "search", "sources"]),
];

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Discovery probe settings.
///
/// # Invariants
/// - `well_known_path` starts with `/`.
/// - `probe_timeout` and `max_document_bytes` are non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Path appended to the base URL when probing.
    pub well_known_path: String,
    /// Whole-request timeout for a probe.
    pub probe_timeout: Duration,
    /// Maximum accepted document size.
    pub max_document_bytes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            well_known_path: DEFAULT_WELL_KNOWN_PATH.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The descriptor violates the command/URL invariant.
    #[error("invalid service descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Expected probe failure classes; anything else is a bug and not caught here.
#[derive(Debug, Error)]
enum ProbeError {
    /// The candidate base URL did not parse.
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    /// Connection or protocol failure.
    #[error("network error: {0}")]
    Network(String),
    /// The probe exceeded its timeout.
    #[error("probe timed out")]
    Timeout,
    /// Non-success HTTP status.
    #[error("http status {0}")]
    Status(u16),
    /// Body exceeded the document size limit.
    #[error("discovery document exceeds size limit")]
    TooLarge,
    /// Body was not a conforming discovery document.
    #[error("malformed discovery document: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Thread-safe directory of backend services.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    /// Registered services keyed by name.
    services: RwLock<BTreeMap<String, ServiceDescriptor>>,
    /// Probe settings.
    config: DiscoveryConfig,
}

impl DiscoveryRegistry {
    /// Creates an empty registry with default probe settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with the given probe settings.
    #[must_use]
    pub fn with_config(config: DiscoveryConfig) -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Returns the probe settings.
    #[must_use]
    pub const fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Inserts or overwrites a descriptor, returning the one it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidDescriptor`] when the descriptor mixes
    /// a command with a URL or has an unusable name.
    pub fn register(
        &self,
        descriptor: ServiceDescriptor,
    ) -> Result<Option<ServiceDescriptor>, DiscoveryError> {
        descriptor.validate().map_err(DiscoveryError::InvalidDescriptor)?;
        debug!(service = %descriptor.name, transport = %descriptor.transport, "registering service");
        Ok(self.write_services().insert(descriptor.name.clone(), descriptor))
    }

    /// Removes a service, returning whether it was present.
    pub fn unregister(&self, name: &str) -> bool {
        self.write_services().remove(name).is_some()
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ServiceDescriptor> {
        self.read_services().get(name).cloned()
    }

    /// Returns a snapshot copy of every registered service.
    #[must_use]
    pub fn servers(&self) -> BTreeMap<String, ServiceDescriptor> {
        self.read_services().clone()
    }

    /// Returns registered service names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read_services().keys().cloned().collect()
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.read_services().len()
    }

    /// Registers the built-in HGK local services and returns how many were
    /// registered.
    pub fn register_local_defaults(&self) -> usize {
        let mut services = self.write_services();
        for (name, module, capabilities) in LOCAL_DEFAULTS {
            let command = vec!["python".to_string(), "-m".to_string(), (*module).to_string()];
            let descriptor = ServiceDescriptor::local(*name, command)
                .with_capabilities(capabilities.iter().copied());
            services.insert((*name).to_string(), descriptor);
        }
        LOCAL_DEFAULTS.len()
    }

    /// Probes `base_url` for a discovery document and registers the result.
    ///
    /// Returns `None` on any network failure, timeout, non-success status,
    /// oversize body, or non-conforming document. The registry is untouched
    /// in that case.
    pub async fn discover(&self, base_url: &str) -> Option<ServiceDescriptor> {
        let client = match probe_client(self.config.probe_timeout) {
            Ok(client) => client,
            Err(err) => {
                warn!(base_url, error = %err, "discovery client unavailable");
                return None;
            }
        };
        self.discover_with(&client, base_url).await
    }

    /// Probes every candidate, continuing past individual failures.
    pub async fn discover_all<I, S>(&self, base_urls: I) -> Vec<ServiceDescriptor>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let client = match probe_client(self.config.probe_timeout) {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "discovery client unavailable");
                return Vec::new();
            }
        };
        let mut found = Vec::new();
        for base_url in base_urls {
            if let Some(descriptor) = self.discover_with(&client, base_url.as_ref()).await {
                found.push(descriptor);
            }
        }
        found
    }

    /// Runs one probe with a shared client.
    async fn discover_with(&self, client: &Client, base_url: &str) -> Option<ServiceDescriptor> {
        let descriptor = match self.probe(client, base_url).await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(base_url, error = %err, "mcp discovery probe failed");
                return None;
            }
        };
        match self.register(descriptor.clone()) {
            Ok(_) => {
                info!(
                    service = %descriptor.name,
                    transport = %descriptor.transport,
                    capabilities = descriptor.capabilities.len(),
                    "discovered mcp service"
                );
                Some(descriptor)
            }
            Err(err) => {
                warn!(base_url, error = %err, "discovered service rejected");
                None
            }
        }
    }

    /// Fetches and decodes the discovery document.
    async fn probe(&self, client: &Client, base_url: &str) -> Result<ServiceDescriptor, ProbeError> {
        let base = base_url.trim().trim_end_matches('/');
        let probe_url = Url::parse(&format!("{base}{}", self.config.well_known_path))
            .map_err(|err| ProbeError::InvalidUrl(err.to_string()))?;
        let mut response = client
            .get(probe_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| map_send_error(&err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let bytes = read_limited(&mut response, self.config.max_document_bytes).await?;
        let document: DiscoveryDocument =
            serde_json::from_slice(&bytes).map_err(|err| ProbeError::Malformed(err.to_string()))?;
        document.into_descriptor(base)
    }

    /// Acquires the read lock, recovering from poisoning.
    fn read_services(&self) -> RwLockReadGuard<'_, BTreeMap<String, ServiceDescriptor>> {
        self.services.read().unwrap_or_else(|poisoned| {
            warn!("discovery registry lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Acquires the write lock, recovering from poisoning.
    fn write_services(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ServiceDescriptor>> {
        self.services.write().unwrap_or_else(|poisoned| {
            warn!("discovery registry lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

// ============================================================================
// SECTION: Discovery Document
// ============================================================================

/// Well-known discovery document.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    /// Service name.
    name: Option<String>,
    /// Free-form description.
    description: Option<String>,
    /// Declared protocol version.
    #[serde(alias = "protocolVersion")]
    protocol_version: Option<String>,
    /// Capability map; keys are capability names.
    capabilities: Option<Value>,
    /// Resource map; keys are resource names.
    resources: Option<Value>,
    /// Authentication hint.
    authentication: Option<AuthenticationHint>,
    /// Transport hint.
    transport: Option<TransportHint>,
    /// Endpoint URL, absolute or relative to the base URL.
    #[serde(alias = "url")]
    endpoint: Option<String>,
}

/// `authentication` block of a discovery document.
#[derive(Debug, Deserialize)]
struct AuthenticationHint {
    /// Declared auth type.
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// `transport` hint: either a bare label or a typed object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TransportHint {
    /// Bare transport label.
    Label(String),
    /// Transport object with an optional endpoint.
    Detailed {
        /// Transport label.
        #[serde(rename = "type")]
        kind: Option<String>,
        /// Endpoint URL for this transport.
        #[serde(alias = "endpoint")]
        url: Option<String>,
    },
}

impl DiscoveryDocument {
    /// Converts the document into a remote descriptor rooted at `base`.
    fn into_descriptor(self, base: &str) -> Result<ServiceDescriptor, ProbeError> {
        let name = self
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProbeError::Malformed("missing service name".to_string()))?;
        let (kind, hinted_url) = match self.transport {
            Some(TransportHint::Label(label)) => (Some(label), None),
            Some(TransportHint::Detailed {
                kind,
                url,
            }) => (kind, url),
            None => (None, None),
        };
        let transport = kind.map_or(TransportKind::StreamableHttp, |label| TransportKind::parse(&label));
        if transport.is_local() {
            return Err(ProbeError::Malformed("remote document advertises stdio".to_string()));
        }
        let url = match hinted_url.or(self.endpoint) {
            Some(endpoint) => resolve_endpoint(base, &endpoint)?,
            None => base.to_string(),
        };
        let mut descriptor = ServiceDescriptor::remote(name, transport, url);
        descriptor.capabilities = names_of(self.capabilities.as_ref());
        descriptor.resources = names_of(self.resources.as_ref());
        descriptor.auth_requirement = self.authentication.and_then(|auth| auth.kind);
        if let Some(version) = self.protocol_version {
            descriptor.protocol_version = version;
        }
        descriptor.metadata.insert("discovered_from".to_string(), Value::String(base.to_string()));
        if let Some(description) = self.description {
            descriptor.metadata.insert("description".to_string(), Value::String(description));
        }
        Ok(descriptor)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the HTTP client used for probes.
fn probe_client(timeout: Duration) -> Result<Client, ProbeError> {
    Client::builder().timeout(timeout).build().map_err(|err| ProbeError::Network(err.to_string()))
}

/// Maps reqwest failures onto probe failure classes.
fn map_send_error(error: &reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Network(error.to_string())
    }
}

/// Reads a response body, refusing anything over `max_bytes`.
async fn read_limited(
    response: &mut reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ProbeError> {
    let max_bytes_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if let Some(length) = response.content_length()
        && length > max_bytes_u64
    {
        return Err(ProbeError::TooLarge);
    }
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|err| map_send_error(&err))? {
        buf.extend_from_slice(&chunk);
        if buf.len() > max_bytes {
            return Err(ProbeError::TooLarge);
        }
    }
    Ok(buf)
}

/// Resolves an advertised endpoint against the probed base URL.
fn resolve_endpoint(base: &str, endpoint: &str) -> Result<String, ProbeError> {
    let endpoint = endpoint.trim();
    if let Ok(absolute) = Url::parse(endpoint) {
        return Ok(absolute.into());
    }
    let base_url =
        Url::parse(&format!("{base}/")).map_err(|err| ProbeError::InvalidUrl(err.to_string()))?;
    base_url
        .join(endpoint.trim_start_matches('/'))
        .map(String::from)
        .map_err(|err| ProbeError::Malformed(format!("invalid endpoint: {err}")))
}

/// Collects names from a map (keys) or a list (strings or `name` fields).
fn names_of(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Object(object) => object.get("name").and_then(Value::as_str).map(ToString::to_string),
                _ => None,
            })
            .collect(),
        _ => BTreeSet::new(),
    }
}
