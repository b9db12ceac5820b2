//! The process bridge: a registry of tool servers, lazily started
//! connections, and request multiplexing by correlation id.
//!
//! The bridge is an explicit value with its own lifecycle rather than
//! process-wide state; several independent bridges can coexist in one
//! process and tests get deterministic teardown.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use toolgate_core::BridgeConfig;
use toolgate_core::rpc::{Notification, Request, RpcMethod};

use crate::connection::{Connection, ExitHook};
use crate::error::BridgeError;

/// Separator between server and tool in a compound tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Client name reported in the initialize handshake.
const CLIENT_NAME: &str = "toolgate";

/// Split a compound tool name into `(server, tool)`.
///
/// `"db__query"` → `("db", "query")`. The tool part may itself contain the
/// separator; only the first occurrence splits.
pub fn split_tool_name(full_name: &str) -> Option<(&str, &str)> {
    full_name.split_once(TOOL_NAME_SEPARATOR)
}

type ConnectionCell = Arc<OnceCell<Arc<Connection>>>;

struct BridgeInner {
    config: BridgeConfig,
    /// Live connections keyed by server name. The per-name `OnceCell`
    /// guarantees a single spawn even under concurrent first use.
    connections: RwLock<HashMap<String, ConnectionCell>>,
}

/// Multiplexing bridge to registered tool-server subprocesses.
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create a bridge over a fixed server registry.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registered server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.config.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke `<server>__<tool>` with the given arguments and return the
    /// response's result payload.
    ///
    /// The first call for a server spawns its subprocess and runs the
    /// initialize handshake; concurrent first calls await the same startup.
    pub async fn call_tool(
        &self,
        full_name: &str,
        arguments: Value,
    ) -> Result<Value, BridgeError> {
        let (server, tool) =
            split_tool_name(full_name).ok_or_else(|| BridgeError::MalformedToolName {
                name: full_name.to_string(),
            })?;
        let conn = self.connection(server).await?;
        self.request(server, &conn, RpcMethod::ToolsCall, |id| {
            Request::tools_call(id, tool, arguments)
        })
        .await
    }

    /// Ask a server for its tool metadata (`tools/list`).
    pub async fn list_tools(&self, server: &str) -> Result<Value, BridgeError> {
        let conn = self.connection(server).await?;
        self.request(server, &conn, RpcMethod::ToolsList, Request::tools_list)
            .await
    }

    /// Terminate one server's subprocess and discard its connection state.
    ///
    /// Closing a never-started or already-closed server is a no-op.
    pub async fn close_server(&self, server: &str) {
        let cell = self.inner.connections.write().await.remove(server);
        if let Some(cell) = cell {
            if let Some(conn) = cell.get() {
                info!(server = %server, "Closing tool server");
                conn.shutdown(self.inner.config.terminate_timeout()).await;
            }
        }
    }

    /// Terminate every live subprocess and discard all connection state.
    pub async fn close_all(&self) {
        let cells: Vec<(String, ConnectionCell)> =
            self.inner.connections.write().await.drain().collect();
        for (server, cell) in cells {
            if let Some(conn) = cell.get() {
                info!(server = %server, "Closing tool server");
                conn.shutdown(self.inner.config.terminate_timeout()).await;
            }
        }
    }

    /// Get or create the connection for a server, spawning and handshaking
    /// on first use.
    async fn connection(&self, server: &str) -> Result<Arc<Connection>, BridgeError> {
        let server_config = self
            .inner
            .config
            .server(server)
            .ok_or_else(|| BridgeError::UnknownServer {
                name: server.to_string(),
            })?
            .clone();

        let cell = {
            let connections = self.inner.connections.read().await;
            connections.get(server).cloned()
        };
        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut connections = self.inner.connections.write().await;
                connections
                    .entry(server.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };

        let conn = cell
            .get_or_try_init(|| async {
                let inner = Arc::clone(&self.inner);
                let hook_server = server.to_string();
                let conn = Connection::spawn(server, &server_config, move |weak| {
                    exit_hook(inner, hook_server, weak)
                })?;
                if let Err(e) = self.handshake(server, &conn).await {
                    warn!(server = %server, error = %e, "Handshake failed, terminating");
                    conn.shutdown(self.inner.config.terminate_timeout()).await;
                    return Err(e);
                }
                info!(server = %server, "Tool server ready");
                Ok(conn)
            })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Run the initialize exchange and mark the connection ready.
    ///
    /// Must complete before any application-level request is queued; the
    /// per-name `OnceCell` enforces that ordering for concurrent callers.
    async fn handshake(&self, server: &str, conn: &Arc<Connection>) -> Result<(), BridgeError> {
        let result = self
            .request(server, conn, RpcMethod::Initialize, |id| {
                Request::initialize(id, CLIENT_NAME, env!("CARGO_PKG_VERSION"))
            })
            .await?;
        let server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        debug!(server = %server, info = %server_info, "Handshake complete");
        let line = Notification::initialized()
            .to_line()
            .map_err(|e| BridgeError::Protocol {
                server: server.to_string(),
                reason: e.to_string(),
            })?;
        conn.send_line(line).await
    }

    /// Issue one request on a connection and await its matching response.
    ///
    /// The pending slot is removed on exactly one of response, timeout or
    /// connection loss; a late response after removal is dropped by the
    /// reader as stale.
    async fn request(
        &self,
        server: &str,
        conn: &Arc<Connection>,
        method: RpcMethod,
        build: impl FnOnce(u64) -> Request,
    ) -> Result<Value, BridgeError> {
        let Some((id, rx)) = conn.pending().register().await else {
            // Connection died but eviction has not landed yet; clean up so
            // the next call respawns fresh.
            evict(&self.inner, server, conn).await;
            return Err(BridgeError::ConnectionClosed {
                server: server.to_string(),
            });
        };

        let line = build(id).to_line().map_err(|e| BridgeError::Protocol {
            server: server.to_string(),
            reason: e.to_string(),
        })?;
        if let Err(e) = conn.send_line(line).await {
            conn.pending().abandon(id).await;
            evict(&self.inner, server, conn).await;
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.call_timeout(), rx).await {
            Ok(Ok(completion)) => completion.map_err(BridgeError::Remote),
            // Sender dropped: the reader failed all pending on EOF.
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed {
                server: server.to_string(),
            }),
            Err(_) => {
                conn.pending().abandon(id).await;
                warn!(server = %server, id, method = %method, "Request timed out");
                Err(BridgeError::Timeout {
                    server: server.to_string(),
                    method,
                    timeout_secs: self.inner.config.call_timeout_secs,
                })
            }
        }
    }
}

/// Build the exit hook for a new connection: on subprocess EOF, evict the
/// registry entry if (and only if) it still refers to that connection.
fn exit_hook(inner: Arc<BridgeInner>, server: String, weak: Weak<Connection>) -> ExitHook {
    Box::pin(async move {
        if let Some(conn) = weak.upgrade() {
            evict(&inner, &server, &conn).await;
        }
    })
}

/// Remove a server's registry entry if it currently holds `conn`.
///
/// Identity-checked so a stale eviction never tears down a healthy
/// respawned connection under the same name.
async fn evict(inner: &BridgeInner, server: &str, conn: &Arc<Connection>) {
    let mut connections = inner.connections.write().await;
    let matches = connections
        .get(server)
        .and_then(|cell| cell.get())
        .is_some_and(|current| Arc::ptr_eq(current, conn));
    if matches {
        connections.remove(server);
        debug!(server = %server, "Evicted dead connection");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolgate_core::ServerConfig;

    #[test]
    fn split_tool_name_cases() {
        assert_eq!(split_tool_name("db__query"), Some(("db", "query")));
        assert_eq!(
            split_tool_name("img__generate__hires"),
            Some(("img", "generate__hires"))
        );
        assert_eq!(split_tool_name("noseparator"), None);
        assert_eq!(split_tool_name("db_query"), None);
        assert_eq!(split_tool_name("__tool"), Some(("", "tool")));
    }

    #[test]
    fn server_names_are_sorted() {
        let bridge = Bridge::new(
            BridgeConfig::default()
                .with_server("zeta", ServerConfig::new("z"))
                .with_server("alpha", ServerConfig::new("a")),
        );
        assert_eq!(bridge.server_names(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn malformed_name_fails_before_io() {
        let bridge = Bridge::new(BridgeConfig::default());
        let err = bridge
            .call_tool("no-separator-here", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedToolName { .. }));
    }

    #[tokio::test]
    async fn unknown_server_fails_before_io() {
        let bridge = Bridge::new(BridgeConfig::default());
        let err = bridge.call_tool("ghost__tool", json!({})).await.unwrap_err();
        match err {
            BridgeError::UnknownServer { name } => assert_eq!(name, "ghost"),
            other => panic!("expected UnknownServer, got {other:?}"),
        }
        let err = bridge.list_tools("ghost").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownServer { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_to_caller() {
        let bridge = Bridge::new(
            BridgeConfig::default()
                .with_server("broken", ServerConfig::new("/nonexistent/tool-server")),
        );
        let err = bridge.call_tool("broken__x", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn close_never_started_server_is_noop() {
        let bridge = Bridge::new(
            BridgeConfig::default().with_server("idle", ServerConfig::new("/bin/cat")),
        );
        bridge.close_server("idle").await;
        bridge.close_server("idle").await;
        bridge.close_all().await;
    }
}
