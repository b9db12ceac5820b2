//! Error types for bridge operations.

use thiserror::Error;
use toolgate_core::rpc::{RpcError, RpcMethod};

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced to callers of the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The compound tool name is missing the `__` separator.
    #[error("Malformed tool name (expected <server>__<tool>): {name}")]
    MalformedToolName { name: String },

    /// The server part of the name is not in the registry.
    #[error("Unknown server: {name}")]
    UnknownServer { name: String },

    /// The subprocess could not be started.
    #[error("Failed to spawn server {server}: {reason}")]
    SpawnFailed { server: String, reason: String },

    /// The subprocess exited or its pipes broke while requests were in
    /// flight or being issued.
    #[error("Connection to server {server} closed")]
    ConnectionClosed { server: String },

    /// No response arrived within the configured window.
    #[error("No response from server {server} to {method} within {timeout_secs}s")]
    Timeout {
        server: String,
        method: RpcMethod,
        timeout_secs: u64,
    },

    /// The server answered with a structured error for this request.
    #[error(transparent)]
    Remote(#[from] RpcError),

    /// An outbound message could not be serialized.
    #[error("Protocol error on server {server}: {reason}")]
    Protocol { server: String, reason: String },
}
