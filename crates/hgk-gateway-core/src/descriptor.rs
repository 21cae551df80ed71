// crates/hgk-gateway-core/src/descriptor.rs
// ============================================================================
// Module: Service Descriptors
// Description: Backend service identity and transport metadata.
// Purpose: Describe how the gateway reaches a service without doing I/O.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`ServiceDescriptor`] records one backend: its name, the closed
//! [`TransportKind`] it speaks, and either a local argv or a remote URL.
//! Descriptors are plain data; reachability is only discovered when a call is
//! forwarded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Protocol version tag recorded when a service does not declare one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

// ============================================================================
// SECTION: Transport Kind
// ============================================================================

/// Transport used to reach a backend service.
///
/// # Invariants
/// - `Other` is never forwarded over; the router maps it to
///   `UNSUPPORTED_TRANSPORT`.
/// - Wire labels round-trip through [`TransportKind::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransportKind {
    /// Local subprocess speaking JSON-RPC over stdin/stdout.
    Stdio,
    /// Remote streamable HTTP endpoint.
    StreamableHttp,
    /// Remote server-sent-events endpoint.
    Sse,
    /// Any transport label the gateway cannot forward over.
    Other(String),
}

impl TransportKind {
    /// Parses a transport label, accepting common aliases.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "stdio" | "local" | "process" => Self::Stdio,
            "streamable-http" | "streamable_http" | "http" => Self::StreamableHttp,
            "sse" => Self::Sse,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    /// Returns the wire label for the transport.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stdio => "stdio",
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
            Self::Other(label) => label,
        }
    }

    /// Returns true for the local-process transport.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Stdio)
    }

    /// Returns true for transports that need a URL.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::StreamableHttp | Self::Sse)
    }
}

impl From<String> for TransportKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TransportKind> for String {
    fn from(value: TransportKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Service Descriptor
// ============================================================================

/// One backend service known to the gateway.
///
/// # Invariants
/// - A local-process descriptor never carries a URL.
/// - A remote descriptor never carries a command.
/// - An empty command or missing URL is representable; forwarding reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique service name; the namespace prefix in `service.capability`.
    pub name: String,
    /// Transport used to reach the service.
    pub transport: TransportKind,
    /// Program and arguments for local-process services.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Endpoint URL for remote services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Informational protocol version tag.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Advertised capability names.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Advertised resource names.
    #[serde(default)]
    pub resources: BTreeSet<String>,
    /// Declared auth requirement tag (for example `none` or `static-key`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_requirement: Option<String>,
    /// Discovery-time extras.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl ServiceDescriptor {
    /// Builds a local-process descriptor from an argv.
    #[must_use]
    pub fn local(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command,
            url: None,
            protocol_version: default_protocol_version(),
            capabilities: BTreeSet::new(),
            resources: BTreeSet::new(),
            auth_requirement: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Builds a remote descriptor for the given transport and URL.
    #[must_use]
    pub fn remote(name: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            command: Vec::new(),
            url: Some(url.into()),
            protocol_version: default_protocol_version(),
            capabilities: BTreeSet::new(),
            resources: BTreeSet::new(),
            auth_requirement: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Replaces the advertised capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true when the service is reached through a subprocess.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.transport.is_local()
    }

    /// Returns true when the service is reached over HTTP or SSE.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.transport.is_remote()
    }

    /// Returns the configured URL when it is non-empty.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    /// Checks the command/URL exclusivity invariant.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation when the descriptor is
    /// cross-populated or unnamed.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name must be non-empty".to_string());
        }
        if self.name.contains('.') {
            return Err(format!("service name '{}' must not contain '.'", self.name));
        }
        if self.is_local() && self.endpoint().is_some() {
            return Err(format!("local service '{}' must not carry a url", self.name));
        }
        if !self.is_local() && !self.command.is_empty() {
            return Err(format!("remote service '{}' must not carry a command", self.name));
        }
        Ok(())
    }
}

/// Default protocol version for serde.
fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}
