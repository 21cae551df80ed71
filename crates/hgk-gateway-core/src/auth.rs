// crates/hgk-gateway-core/src/auth.rs
// ============================================================================
// Module: Auth Proxy
// Description: Per-service authentication context for forwarded calls.
// Purpose: Produce transport-ready auth headers from static configuration.
// Dependencies: serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! The [`AuthProxy`] maps a service name to an [`AuthConfig`] and turns it into
//! an [`AuthContext`] holding the headers to attach when forwarding. It never
//! touches the network. Unconfigured services default to passthrough.
//!
//! A static-key service without a key yields `authenticated = false`; that is
//! a normal outcome. The OAuth2 mode is declared but not implemented and
//! reports [`AuthError::NotImplemented`], which callers must keep distinct from
//! a credential failure.
//!
//! Security posture: keys never appear in `Debug` output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header used for static keys unless overridden.
pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

// ============================================================================
// SECTION: Auth Mode
// ============================================================================

/// Authentication mode for a backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No credentials are attached.
    #[default]
    Passthrough,
    /// A static key is sent as a bearer token or custom header.
    #[serde(alias = "api_key", alias = "static-key")]
    StaticKey,
    /// Reserved; not implemented.
    #[serde(alias = "oauth")]
    Oauth2,
}

impl AuthMode {
    /// Returns a stable label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::StaticKey => "static_key",
            Self::Oauth2 => "oauth2",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Per-service authentication configuration.
///
/// # Invariants
/// - `static_key` is only consulted in [`AuthMode::StaticKey`].
/// - `extra` is reserved for future modes and is never interpreted.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Service the config applies to.
    pub service_name: String,
    /// Authentication mode.
    #[serde(default)]
    pub mode: AuthMode,
    /// Static key value.
    #[serde(default, skip_serializing)]
    pub static_key: Option<String>,
    /// Header override; the raw key is sent when set.
    #[serde(default)]
    pub header: Option<String>,
    /// Free-form settings for future modes.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl AuthConfig {
    /// Creates a config with the given mode and no key.
    #[must_use]
    pub fn new(service_name: impl Into<String>, mode: AuthMode) -> Self {
        Self {
            service_name: service_name.into(),
            mode,
            static_key: None,
            header: None,
            extra: BTreeMap::new(),
        }
    }

    /// Creates a passthrough config.
    #[must_use]
    pub fn passthrough(service_name: impl Into<String>) -> Self {
        Self::new(service_name, AuthMode::Passthrough)
    }

    /// Creates a static-key config; `None` models a key that was never set.
    #[must_use]
    pub fn static_key(service_name: impl Into<String>, key: Option<String>) -> Self {
        Self {
            static_key: key,
            ..Self::new(service_name, AuthMode::StaticKey)
        }
    }

    /// Sets a custom header name for the static key.
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("service_name", &self.service_name)
            .field("mode", &self.mode)
            .field("static_key", &self.static_key.as_ref().map(|_| "<redacted>"))
            .field("header", &self.header)
            .field("extra", &self.extra)
            .finish()
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Authentication result for one service.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Mode that produced the context.
    pub mode: AuthMode,
    /// Headers to attach to forwarded requests.
    pub headers: BTreeMap<String, String>,
    /// Service the context belongs to.
    pub service_name: String,
    /// Whether credentials were available.
    pub authenticated: bool,
}

impl AuthContext {
    /// Returns true when no credentials are involved.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.mode == AuthMode::Passthrough
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("mode", &self.mode)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("service_name", &self.service_name)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication errors that are not credential failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The configured mode has no implementation yet.
    #[error("auth mode '{mode}' for service '{service}' is not implemented")]
    NotImplemented {
        /// Service whose config selected the mode.
        service: String,
        /// Unimplemented mode.
        mode: AuthMode,
    },
}

// ============================================================================
// SECTION: Proxy
// ============================================================================

/// Per-service auth configuration table.
#[derive(Debug, Default)]
pub struct AuthProxy {
    /// Configs keyed by service name.
    configs: RwLock<BTreeMap<String, AuthConfig>>,
}

impl AuthProxy {
    /// Creates an empty proxy; every service is passthrough.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the config for `config.service_name`.
    pub fn configure_server(&self, config: AuthConfig) {
        debug!(service = %config.service_name, mode = %config.mode, "configuring service auth");
        self.write_configs().insert(config.service_name.clone(), config);
    }

    /// Removes a service config, returning whether it existed.
    pub fn remove_server(&self, service_name: &str) -> bool {
        self.write_configs().remove(service_name).is_some()
    }

    /// Builds the auth context for a service.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotImplemented`] for [`AuthMode::Oauth2`].
    pub fn authenticate(&self, service_name: &str) -> Result<AuthContext, AuthError> {
        let config = self.read_configs().get(service_name).cloned();
        let Some(config) = config else {
            return Ok(passthrough_context(service_name));
        };
        match config.mode {
            AuthMode::Passthrough => Ok(passthrough_context(service_name)),
            AuthMode::StaticKey => Ok(static_key_context(&config)),
            AuthMode::Oauth2 => Err(AuthError::NotImplemented {
                service: service_name.to_string(),
                mode: AuthMode::Oauth2,
            }),
        }
    }

    /// Returns configured service names in sorted order.
    #[must_use]
    pub fn get_configured_servers(&self) -> Vec<String> {
        self.read_configs().keys().cloned().collect()
    }

    /// Returns the number of configured services.
    #[must_use]
    pub fn config_count(&self) -> usize {
        self.read_configs().len()
    }

    /// Acquires the read lock, recovering from poisoning.
    fn read_configs(&self) -> RwLockReadGuard<'_, BTreeMap<String, AuthConfig>> {
        self.configs.read().unwrap_or_else(|poisoned| {
            warn!("auth proxy lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Acquires the write lock, recovering from poisoning.
    fn write_configs(&self) -> RwLockWriteGuard<'_, BTreeMap<String, AuthConfig>> {
        self.configs.write().unwrap_or_else(|poisoned| {
            warn!("auth proxy lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Context for services without credentials.
fn passthrough_context(service_name: &str) -> AuthContext {
    AuthContext {
        mode: AuthMode::Passthrough,
        headers: BTreeMap::new(),
        service_name: service_name.to_string(),
        authenticated: true,
    }
}

/// Context for static-key services.
fn static_key_context(config: &AuthConfig) -> AuthContext {
    let key = config.static_key.as_deref().map(str::trim).filter(|key| !key.is_empty());
    let Some(key) = key else {
        warn!(service = %config.service_name, "static key missing; service is unauthenticated");
        return AuthContext {
            mode: AuthMode::StaticKey,
            headers: BTreeMap::new(),
            service_name: config.service_name.clone(),
            authenticated: false,
        };
    };
    let (name, value) = match config.header.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(header) => (header.to_string(), key.to_string()),
        None => (DEFAULT_AUTH_HEADER.to_string(), format!("Bearer {key}")),
    };
    AuthContext {
        mode: AuthMode::StaticKey,
        headers: BTreeMap::from([(name, value)]),
        service_name: config.service_name.clone(),
        authenticated: true,
    }
}
