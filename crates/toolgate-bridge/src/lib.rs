//! Toolgate Bridge Library
//!
//! Core functionality for the Toolgate bridge:
//! - Lazy subprocess lifecycle per registered tool server
//! - Request/response multiplexing over newline-delimited JSON-RPC
//! - Pending-completion tracking with per-request timeouts

pub mod bridge;
pub mod error;

mod connection;
mod pending;

pub use bridge::{Bridge, TOOL_NAME_SEPARATOR};
pub use error::{BridgeError, Result};
