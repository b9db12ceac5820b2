//! JSON-RPC 2.0 wire protocol for tool-server subprocesses.
//!
//! Messages travel as newline-delimited JSON over the subprocess's
//! stdin/stdout, one message per line. Inbound parsing follows a tolerant
//! reader pattern: lines that are not a response envelope are classified as
//! diagnostic noise rather than errors.

mod envelope;
mod framing;

pub use envelope::{
    Inbound, JSONRPC_VERSION, Notification, PROTOCOL_VERSION, Request, Response, RpcError,
    RpcMethod, classify_line,
};
pub use framing::LineBuffer;
