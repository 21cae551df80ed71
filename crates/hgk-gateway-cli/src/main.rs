// crates/hgk-gateway-cli/src/main.rs
// ============================================================================
// Module: HGK Gateway CLI Entry Point
// Description: Command dispatcher for serving and inspecting the gateway.
// Purpose: Run the MCP gateway and expose routing diagnostics from a shell.
// Dependencies: clap, hgk-gateway-config, hgk-gateway-mcp, tokio, tracing.
// ============================================================================

//! ## Overview
//! `hgk-gateway serve` runs the MCP facade over stdio or HTTP. The remaining
//! commands build the same gateway from config and answer one question each:
//! what is registered, where a name routes, what a call returns, what a
//! discovery probe finds, and whether a policy or config file is valid.
//!
//! Logs go to stderr through `tracing-subscriber` so stdout stays clean for
//! JSON output and the stdio transport.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use hgk_gateway_config::CONFIG_ENV_VAR;
use hgk_gateway_config::DEFAULT_CONFIG_NAME;
use hgk_gateway_config::GatewayConfig;
use hgk_gateway_core::DiscoveryRegistry;
use hgk_gateway_core::PolicyEnforcer;
use hgk_gateway_core::PolicyResult;
use hgk_gateway_core::ServiceDescriptor;
use hgk_gateway_mcp::Gateway;
use hgk_gateway_mcp::McpServer;
use hgk_gateway_mcp::ResolvedRoute;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of the `--args` JSON payload.
const MAX_ARGUMENTS_BYTES: usize = 1024 * 1024;
/// Log filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "hgk-gateway", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to hgk-gateway.toml or `HGK_GATEWAY_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the MCP gateway server.
    Serve,
    /// Print registered servers, tools, policies, and auth configs.
    Status,
    /// Resolve a namespaced tool name without forwarding it.
    Route(RouteCommand),
    /// Forward a tool call and print the result.
    Call(CallCommand),
    /// Probe base URLs for MCP discovery documents.
    Discover(DiscoverCommand),
    /// Policy document utilities.
    Policy {
        /// Selected policy subcommand.
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `route`.
#[derive(Args, Debug)]
struct RouteCommand {
    /// Namespaced tool name (`service.capability`).
    name: String,
}

/// Arguments for `call`.
#[derive(Args, Debug)]
struct CallCommand {
    /// Namespaced tool name (`service.capability`).
    name: String,
    /// Tool arguments as a JSON object.
    #[arg(long, value_name = "JSON")]
    args: Option<String>,
    /// Call timeout in milliseconds, clamped to the configured ceiling.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

/// Arguments for `discover`.
#[derive(Args, Debug)]
struct DiscoverCommand {
    /// Base URLs to probe.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Strictly load a policy document and optionally evaluate one call.
    Check(PolicyCheckCommand),
}

/// Arguments for `policy check`.
#[derive(Args, Debug)]
struct PolicyCheckCommand {
    /// Policy YAML path.
    path: PathBuf,
    /// Service to evaluate.
    #[arg(long, requires = "capability")]
    service: Option<String>,
    /// Capability to evaluate.
    #[arg(long, requires = "service")]
    capability: Option<String>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the gateway config.
    Validate,
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// Rendered outcome of `route`.
#[derive(Debug, Serialize)]
struct RouteOutput {
    /// Target service.
    service: String,
    /// Capability within the service.
    capability: String,
    /// Transport label.
    transport: String,
    /// Remote endpoint, when the service has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    /// Policy outcome that admitted the route.
    policy: PolicyResult,
    /// Names of headers that would be attached; values are never printed.
    auth_headers: Vec<String>,
}

/// One probed base URL.
#[derive(Debug, Serialize)]
struct DiscoverOutput {
    /// Probed base URL.
    url: String,
    /// Descriptor built from the discovery document.
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<ServiceDescriptor>,
}

/// Rendered outcome of `policy check`.
#[derive(Debug, Serialize)]
struct PolicyCheckOutput {
    /// Number of policy entries.
    policies: usize,
    /// Explicit server allow-list.
    allowed_servers: BTreeSet<String>,
    /// Configured rate limiter names.
    rate_limiters: Vec<String>,
    /// Decision for the requested call, when one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<PolicyResult>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Installs the stderr log subscriber.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve => command_serve(config_path).await,
        Commands::Status => command_status(config_path).await,
        Commands::Route(command) => command_route(config_path, &command).await,
        Commands::Call(command) => command_call(config_path, command).await,
        Commands::Discover(command) => command_discover(config_path, &command).await,
        Commands::Policy {
            command: PolicyCommand::Check(command),
        } => command_policy_check(&command),
        Commands::Config {
            command: ConfigCommand::Validate,
        } => command_config_validate(config_path),
    }
}

// ============================================================================
// SECTION: Gateway Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let server = McpServer::from_config(&config)
        .map_err(|err| CliError::new(format!("gateway init failed: {err}")))?;
    server.serve().await.map_err(|err| CliError::new(format!("gateway failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `status` command.
async fn command_status(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let gateway = open_gateway(config_path).await?;
    write_json(&gateway.status())?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `route` command.
async fn command_route(config_path: Option<&Path>, command: &RouteCommand) -> CliResult<ExitCode> {
    let gateway = open_gateway(config_path).await?;
    match gateway.router().route(&command.name) {
        Ok(route) => {
            write_json(&route_output(&route))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            write_json(&err.to_json())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Executes the `call` command.
async fn command_call(config_path: Option<&Path>, command: CallCommand) -> CliResult<ExitCode> {
    let arguments = parse_arguments(command.args.as_deref())?;
    let gateway = open_gateway(config_path).await?;
    let result = gateway.call(&command.name, arguments, command.timeout_ms).await;
    match result.outcome {
        Ok(value) => {
            write_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            write_json(&err.to_json())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Executes the `discover` command against a scratch registry.
async fn command_discover(
    config_path: Option<&Path>,
    command: &DiscoverCommand,
) -> CliResult<ExitCode> {
    let config = load_config(config_path)?;
    let registry = DiscoveryRegistry::with_config(config.discovery.to_discovery_config());
    let mut outputs = Vec::with_capacity(command.urls.len());
    for url in &command.urls {
        outputs.push(DiscoverOutput {
            url: url.clone(),
            service: registry.discover(url).await,
        });
    }
    write_json(&outputs)?;
    if outputs.iter().any(|output| output.service.is_some()) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// SECTION: File Commands
// ============================================================================

/// Executes `policy check`.
fn command_policy_check(command: &PolicyCheckCommand) -> CliResult<ExitCode> {
    let enforcer = PolicyEnforcer::try_load(&command.path)
        .map_err(|err| CliError::new(format!("policy check failed: {err}")))?;
    let decision = match (&command.service, &command.capability) {
        (Some(service), Some(capability)) => Some(enforcer.check(service, capability)),
        _ => None,
    };
    write_json(&PolicyCheckOutput {
        policies: enforcer.policy_count(),
        allowed_servers: enforcer.get_server_list(),
        rate_limiters: enforcer.limiter_names(),
        decision,
    })?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `config validate`.
fn command_config_validate(config_path: Option<&Path>) -> CliResult<ExitCode> {
    let config = GatewayConfig::load(config_path)
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    write_stdout_line(&format!(
        "config ok: {} services, {} auth entries, {} transport",
        config.services.len(),
        config.auth.len(),
        config.server.transport.as_str()
    ))
    .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads config, falling back to built-in defaults when no file is named
/// and the default file is absent.
fn load_config(path: Option<&Path>) -> CliResult<GatewayConfig> {
    if path.is_none()
        && env::var_os(CONFIG_ENV_VAR).is_none()
        && !Path::new(DEFAULT_CONFIG_NAME).exists()
    {
        info!("no config file found; using built-in defaults");
        return Ok(GatewayConfig::default());
    }
    GatewayConfig::load(path).map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Builds a gateway and probes its discovery candidates.
async fn open_gateway(path: Option<&Path>) -> CliResult<Gateway> {
    let config = load_config(path)?;
    let gateway = Gateway::from_config(&config)
        .map_err(|err| CliError::new(format!("gateway init failed: {err}")))?;
    gateway.discover_candidates().await;
    Ok(gateway)
}

/// Parses `--args` into a JSON object.
fn parse_arguments(raw: Option<&str>) -> CliResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    if raw.len() > MAX_ARGUMENTS_BYTES {
        return Err(CliError::new(format!("--args exceeds {MAX_ARGUMENTS_BYTES} bytes")));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| CliError::new(format!("--args is not valid json: {err}")))?;
    if !value.is_object() {
        return Err(CliError::new("--args must be a json object".to_string()));
    }
    Ok(value)
}

/// Renders a resolved route without credential values.
fn route_output(route: &ResolvedRoute) -> RouteOutput {
    RouteOutput {
        service: route.service.name.clone(),
        capability: route.capability.clone(),
        transport: route.service.transport.as_str().to_string(),
        endpoint: route.service.endpoint().map(str::to_string),
        policy: route.policy.clone(),
        auth_headers: route.auth_headers.keys().cloned().collect(),
    }
}

/// Writes pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("json serialization failed: {err}")))?;
    write_stdout_line(&text).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
