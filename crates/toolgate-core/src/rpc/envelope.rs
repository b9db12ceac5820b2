//! JSON-RPC envelope types for the tool-server protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;

/// JSON-RPC version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version string sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Methods the bridge can invoke on a tool server.
///
/// A closed set: adding a method means adding a variant, and every dispatch
/// site is checked for exhaustiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMethod {
    /// Handshake request sent once per connection before anything else.
    #[serde(rename = "initialize")]
    Initialize,
    /// Invoke a named tool with an arguments object.
    #[serde(rename = "tools/call")]
    ToolsCall,
    /// List the tools the server exposes.
    #[serde(rename = "tools/list")]
    ToolsList,
}

impl RpcMethod {
    /// Wire name of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ToolsCall => "tools/call",
            Self::ToolsList => "tools/list",
        }
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request: id, method and optional params.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: RpcMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request for an arbitrary method.
    pub const fn new(id: u64, method: RpcMethod, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Build the initialize handshake request.
    ///
    /// Carries the protocol version, an empty capability set and client
    /// identification, per the tool-server wire contract.
    pub fn initialize(id: u64, client_name: &str, client_version: &str) -> Self {
        Self::new(
            id,
            RpcMethod::Initialize,
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": client_name,
                    "version": client_version,
                },
            })),
        )
    }

    /// Build a `tools/call` request for a named tool.
    pub fn tools_call(id: u64, tool: &str, arguments: Value) -> Self {
        Self::new(
            id,
            RpcMethod::ToolsCall,
            Some(json!({
                "name": tool,
                "arguments": arguments,
            })),
        )
    }

    /// Build a `tools/list` request.
    pub fn tools_list(id: u64) -> Self {
        Self::new(id, RpcMethod::ToolsList, Some(json!({})))
    }

    /// Serialize as a single wire line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// An outbound notification: a method with no id and no reply.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    pub method: &'static str,
}

impl Notification {
    /// The `notifications/initialized` message sent after the handshake
    /// response has been received.
    pub const fn initialized() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: "notifications/initialized",
        }
    }

    /// Serialize as a single wire line (without the trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Structured error reported by a tool server for a given request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound response envelope matching an outstanding request.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Response {
    /// Consume the envelope into the result payload or the remote error.
    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Outcome of classifying one stdout line.
#[derive(Debug)]
pub enum Inbound {
    /// A response envelope correlating to a request id.
    Response(Response),
    /// Anything else on the stream: server diagnostics, server-initiated
    /// traffic, or junk. Logged by the caller and skipped.
    Noise,
}

/// Classify a single stdout line from a tool server.
///
/// A line counts as a response only if it is valid JSON carrying an integer
/// `id` and at least one of `result` / `error`. Everything else is noise:
/// subprocesses are free to print diagnostics on stdout and the bridge must
/// not die over it.
pub fn classify_line(line: &str) -> Inbound {
    let Ok(raw) = serde_json::from_str::<Value>(line) else {
        return Inbound::Noise;
    };
    if raw.get("id").and_then(Value::as_u64).is_none() {
        return Inbound::Noise;
    }
    if raw.get("result").is_none() && raw.get("error").is_none() {
        // An id without a payload is a server-side request, not a response.
        return Inbound::Noise;
    }
    match serde_json::from_value::<Response>(raw) {
        Ok(response) => Inbound::Response(response),
        Err(_) => Inbound::Noise,
    }
}
