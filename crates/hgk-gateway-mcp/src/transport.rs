// crates/hgk-gateway-mcp/src/transport.rs
// ============================================================================
// Module: Forward Transports
// Description: Local-process and remote HTTP/SSE forwarding of tools/call.
// Purpose: Deliver one JSON-RPC request to a backend and decode its reply.
// Dependencies: async-trait, hgk-gateway-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! [`ForwardTransport`] is the I/O seam of the router. Routing has already
//! happened when a transport is called; a transport only moves bytes and maps
//! failures onto [`ErrorCode`]s.
//!
//! [`ProcessHttpTransport`] is the production implementation:
//! - Local: spawn the argv with piped stdio, write the request as one JSON line,
//!   close stdin, and collect stdout within the timeout. The child is killed
//!   when the timeout drops the exchange.
//! - Remote: POST the request with auth headers and accept either a JSON body
//!   or a `text/event-stream` body whose first JSON-RPC `data:` event wins.
//!
//! Security posture: backend output is untrusted and capped at
//! `max_response_bytes`; stderr is only surfaced as a short excerpt.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use hgk_gateway_core::ErrorCode;
use hgk_gateway_core::GatewayError;
use hgk_gateway_core::JsonRpcRequest;
use hgk_gateway_core::JsonRpcResponse;
use reqwest::Client;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default cap on backend response bodies.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
/// Bytes of stderr or body kept for error details.
pub(crate) const EXCERPT_BYTES: usize = 512;
/// `Accept` header sent to remote services.
const REMOTE_ACCEPT: &str = "application/json, text/event-stream";
/// Read buffer size for piped output.
const READ_CHUNK_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Calls
// ============================================================================

/// A forward to a local-process service.
#[derive(Debug, Clone, Copy)]
pub struct LocalCall<'a> {
    /// Program and arguments; never empty.
    pub command: &'a [String],
    /// Request written to stdin.
    pub request: &'a JsonRpcRequest,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

/// A forward to a remote service.
#[derive(Debug, Clone, Copy)]
pub struct RemoteCall<'a> {
    /// Endpoint URL.
    pub url: &'a str,
    /// Auth headers from the auth proxy.
    pub headers: &'a BTreeMap<String, String>,
    /// Request posted as the body.
    pub request: &'a JsonRpcRequest,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Transport seam used by the router after routing succeeds.
///
/// # Invariants
/// - Implementations return a decoded envelope or a [`GatewayError`] with a
///   forwarding code; they never return routing codes.
#[async_trait]
pub trait ForwardTransport: Send + Sync {
    /// Forwards a request to a local subprocess.
    async fn call_local(&self, call: LocalCall<'_>) -> Result<JsonRpcResponse, GatewayError>;

    /// Forwards a request to a remote HTTP or SSE endpoint.
    async fn call_remote(&self, call: RemoteCall<'_>) -> Result<JsonRpcResponse, GatewayError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Transport construction errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP client could not be built.
    #[error("http client init failed: {0}")]
    ClientInit(String),
}

// ============================================================================
// SECTION: Process + HTTP Transport
// ============================================================================

/// Production transport: tokio subprocesses and a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ProcessHttpTransport {
    /// Shared HTTP client; timeouts are applied per request.
    client: Client,
    /// Maximum accepted response size.
    max_response_bytes: usize,
}

impl ProcessHttpTransport {
    /// Builds the transport with the given response cap.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientInit`] when the HTTP client cannot be
    /// constructed.
    pub fn new(max_response_bytes: usize) -> Result<Self, TransportError> {
        let client =
            Client::builder().build().map_err(|err| TransportError::ClientInit(err.to_string()))?;
        Ok(Self {
            client,
            max_response_bytes,
        })
    }

    /// Returns the response cap.
    #[must_use]
    pub const fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }
}

#[async_trait]
impl ForwardTransport for ProcessHttpTransport {
    async fn call_local(&self, call: LocalCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        let (program, args) = call
            .command
            .split_first()
            .ok_or_else(|| GatewayError::new(ErrorCode::NoCommand, "command is empty"))?;
        let mut payload = serde_json::to_vec(call.request).map_err(|err| {
            GatewayError::new(ErrorCode::ForwardError, format!("request serialization failed: {err}"))
        })?;
        payload.push(b'\n');

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| map_spawn_error(program, &err))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(GatewayError::new(ErrorCode::ForwardError, "child stdio unavailable"));
        };
        debug!(program = %program, pid = child.id(), "spawned local service");

        let limit = self.max_response_bytes;
        let exchange = async move {
            let ((), stdout, stderr) = tokio::try_join!(
                write_request(stdin, &payload),
                drain_capped(stdout, limit),
                drain_capped(stderr, EXCERPT_BYTES),
            )?;
            let status = child.wait().await?;
            Ok::<_, io::Error>(LocalOutput {
                status,
                stdout,
                stderr: stderr.bytes,
            })
        };
        let output = match tokio::time::timeout(call.timeout, exchange).await {
            Err(_) => return Err(timeout_error(call.timeout)),
            Ok(Err(err)) => {
                return Err(GatewayError::new(
                    ErrorCode::ForwardError,
                    format!("process i/o failed: {err}"),
                ));
            }
            Ok(Ok(output)) => output,
        };
        decode_local_output(output, limit)
    }

    async fn call_remote(&self, call: RemoteCall<'_>) -> Result<JsonRpcResponse, GatewayError> {
        let headers = build_headers(call.headers)?;
        let mut response = self
            .client
            .post(call.url)
            .headers(headers)
            .header(ACCEPT, REMOTE_ACCEPT)
            .header(CONTENT_TYPE, "application/json")
            .timeout(call.timeout)
            .json(call.request)
            .send()
            .await
            .map_err(|err| map_http_send_error(&err, call.timeout))?;
        let status = response.status();
        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().starts_with("text/event-stream"));
        if !status.is_success() {
            let body = read_error_excerpt(&mut response).await;
            return Err(GatewayError::new(ErrorCode::HttpError, format!("http status {status}"))
                .with_detail("status", status.as_u16())
                .with_detail("body", excerpt(&body)));
        }
        let body = read_http_body(&mut response, self.max_response_bytes, call.timeout).await?;
        let decoded =
            if event_stream { parse_sse_response(&body) } else { parse_json_response(&body) };
        decoded.ok_or_else(|| {
            GatewayError::new(ErrorCode::InvalidResponse, "response is not a json-rpc envelope")
                .with_detail("body", excerpt(&body))
        })
    }
}

// ============================================================================
// SECTION: Local Helpers
// ============================================================================

/// Collected output of a finished child.
struct LocalOutput {
    /// Exit status.
    status: ExitStatus,
    /// Captured stdout, capped.
    stdout: Capped,
    /// Leading stderr bytes.
    stderr: Vec<u8>,
}

/// Bytes read from a pipe, truncated at a cap.
struct Capped {
    /// Retained bytes (at most cap + 1).
    bytes: Vec<u8>,
    /// Whether the pipe produced more than the cap.
    overflowed: bool,
}

/// Writes the request and closes stdin; a child that exits without reading is
/// not an error here.
async fn write_request(mut stdin: ChildStdin, payload: &[u8]) -> io::Result<()> {
    match stdin.write_all(payload).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err),
    }
    match stdin.flush().await {
        Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
        _ => Ok(()),
    }
}

/// Reads a pipe to EOF, keeping at most `cap + 1` bytes so the child never
/// blocks on a full pipe.
async fn drain_capped<R>(mut reader: R, cap: usize) -> io::Result<Capped>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut overflowed = false;
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = cap.saturating_add(1).saturating_sub(bytes.len());
        bytes.extend_from_slice(&chunk[..read.min(room)]);
        if bytes.len() > cap {
            overflowed = true;
        }
    }
    Ok(Capped {
        bytes,
        overflowed,
    })
}

/// Maps the child's exit and stdout onto a response envelope.
fn decode_local_output(output: LocalOutput, limit: usize) -> Result<JsonRpcResponse, GatewayError> {
    if !output.status.success() {
        let mut error = GatewayError::new(
            ErrorCode::ProcessError,
            format!("process exited with {}", output.status),
        )
        .with_detail("stderr", excerpt(&output.stderr));
        if let Some(code) = output.status.code() {
            error = error.with_detail("exit_code", code);
        }
        return Err(error);
    }
    if output.stdout.overflowed {
        return Err(GatewayError::new(
            ErrorCode::InvalidResponse,
            format!("process output exceeds {limit} bytes"),
        ));
    }
    parse_stdout(&output.stdout.bytes).ok_or_else(|| {
        GatewayError::new(ErrorCode::InvalidResponse, "process output is not a json-rpc response")
            .with_detail("stdout", excerpt(&output.stdout.bytes))
            .with_detail("stderr", excerpt(&output.stderr))
    })
}

/// Parses stdout as one envelope, else as line-delimited messages taking the
/// last one that carries `result` or `error`.
pub(crate) fn parse_stdout(stdout: &[u8]) -> Option<JsonRpcResponse> {
    if let Some(response) = parse_json_response(stdout) {
        return Some(response);
    }
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(JsonRpcResponse::from_value)
}

/// Maps spawn failures; a missing or non-executable program is distinct.
fn map_spawn_error(program: &str, err: &io::Error) -> GatewayError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => GatewayError::new(
            ErrorCode::CommandNotFound,
            format!("command '{program}' not found or not executable"),
        ),
        _ => GatewayError::new(ErrorCode::ForwardError, format!("failed to spawn '{program}': {err}")),
    }
}

// ============================================================================
// SECTION: Remote Helpers
// ============================================================================

/// Converts auth headers into a reqwest header map.
fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, GatewayError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            GatewayError::new(ErrorCode::ForwardError, format!("invalid header name '{name}'"))
        })?;
        let mut value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::new(ErrorCode::ForwardError, format!("invalid value for header '{name}'"))
        })?;
        value.set_sensitive(true);
        map.insert(name, value);
    }
    Ok(map)
}

/// Maps reqwest send failures to stable codes.
fn map_http_send_error(error: &reqwest::Error, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        timeout_error(timeout)
    } else if error.is_builder() {
        GatewayError::new(ErrorCode::ForwardError, format!("invalid request: {error}"))
    } else {
        GatewayError::new(ErrorCode::HttpError, format!("http request failed: {error}"))
    }
}

/// Reads an HTTP body with a maximum size limit.
async fn read_http_body(
    response: &mut reqwest::Response,
    max_bytes: usize,
    timeout: Duration,
) -> Result<Vec<u8>, GatewayError> {
    let too_large = || {
        GatewayError::new(ErrorCode::InvalidResponse, format!("response exceeds {max_bytes} bytes"))
    };
    let max_bytes_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if let Some(length) = response.content_length()
        && length > max_bytes_u64
    {
        return Err(too_large());
    }
    let mut buf = Vec::new();
    while let Some(chunk) =
        response.chunk().await.map_err(|err| map_http_send_error(&err, timeout))?
    {
        buf.extend_from_slice(&chunk);
        if buf.len() > max_bytes {
            return Err(too_large());
        }
    }
    Ok(buf)
}

/// Reads the leading bytes of a failure body; the rest is dropped and read
/// errors end the excerpt early.
async fn read_error_excerpt(response: &mut reqwest::Response) -> Vec<u8> {
    let mut buf = Vec::new();
    while buf.len() < EXCERPT_BYTES {
        let Ok(Some(chunk)) = response.chunk().await else {
            break;
        };
        let room = EXCERPT_BYTES - buf.len();
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    buf
}

/// Parses a plain JSON body as a response envelope.
pub(crate) fn parse_json_response(body: &[u8]) -> Option<JsonRpcResponse> {
    serde_json::from_slice::<Value>(body).ok().and_then(JsonRpcResponse::from_value)
}

/// Parses a `text/event-stream` body; the first event whose data is a
/// response envelope wins.
pub(crate) fn parse_sse_response(body: &[u8]) -> Option<JsonRpcResponse> {
    let text = String::from_utf8_lossy(body);
    let mut data = String::new();
    for line in text.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty()
                && let Some(response) = parse_json_response(data.as_bytes())
            {
                return Some(response);
            }
            data.clear();
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    None
}

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

/// Timeout error naming the deadline.
fn timeout_error(timeout: Duration) -> GatewayError {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    GatewayError::new(ErrorCode::Timeout, format!("no response within {millis} ms"))
        .with_detail("timeout_ms", millis)
}

/// Lossy, trimmed prefix of untrusted output.
pub(crate) fn excerpt(bytes: &[u8]) -> String {
    let end = bytes.len().min(EXCERPT_BYTES);
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
