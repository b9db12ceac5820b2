//! `Toolgate` Core Library
//!
//! Shared functionality for `Toolgate` components:
//! - JSON-RPC envelope types and line framing for the tool-server protocol
//! - Tool-server registry configuration
//! - Common error types

pub mod config;
pub mod error;
pub mod rpc;
pub mod tracing_init;

pub use config::{BridgeConfig, ServerConfig};
pub use error::{Error, Result};
