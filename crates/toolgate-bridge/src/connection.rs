//! Tool-server subprocess connection.
//!
//! Owns the child process and its I/O tasks: an mpsc-fed stdin writer, a
//! stdout reader that frames lines and settles pending completions, and a
//! stderr drain for diagnostics.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use toolgate_core::ServerConfig;
use toolgate_core::rpc::{Inbound, LineBuffer, classify_line};

use crate::error::BridgeError;
use crate::pending::PendingTable;

/// Future run by the stdout reader once EOF is observed and all pending
/// completions have been failed. The bridge uses it to evict the dead
/// connection from its registry.
pub(crate) type ExitHook = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Live state for one running tool-server subprocess.
pub(crate) struct Connection {
    server: String,
    stdin_tx: mpsc::Sender<String>,
    pending: Arc<PendingTable>,
    child: Mutex<Option<Child>>,
}

impl Connection {
    /// Spawn the subprocess and its I/O tasks.
    ///
    /// The configured environment overrides are merged over the parent
    /// environment. The handshake is the bridge's job; the connection only
    /// moves bytes and settles completions by id. `on_exit` receives a weak
    /// handle to the new connection so eviction can be identity-checked.
    pub(crate) fn spawn(
        name: &str,
        config: &ServerConfig,
        on_exit: impl FnOnce(Weak<Self>) -> ExitHook,
    ) -> Result<Arc<Self>, BridgeError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Backstop for host-process teardown paths that never reach
            // an explicit shutdown.
            .kill_on_drop(true);

        info!(
            server = %name,
            command = %config.command.display(),
            args = ?config.args,
            "Spawning tool server"
        );
        let mut child = cmd.spawn().map_err(|e| BridgeError::SpawnFailed {
            server: name.to_string(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| BridgeError::SpawnFailed {
            server: name.to_string(),
            reason: "Failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::SpawnFailed {
            server: name.to_string(),
            reason: "Failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take();

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let pending = Arc::new(PendingTable::new());

        let conn = Arc::new(Self {
            server: name.to_string(),
            stdin_tx,
            pending: Arc::clone(&pending),
            child: Mutex::new(Some(child)),
        });
        let on_exit = on_exit(Arc::downgrade(&conn));

        // Stdin writer task: one request per line, newline-terminated.
        let writer_server = name.to_string();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    error!(server = %writer_server, "Failed to write to stdin: {}", e);
                    break;
                }
                if let Err(e) = stdin.write_all(b"\n").await {
                    error!(server = %writer_server, "Failed to write newline: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!(server = %writer_server, "Failed to flush stdin: {}", e);
                    break;
                }
            }
        });

        // Stdout reader task: buffer chunks, parse complete lines, settle
        // pending completions by id. On EOF every outstanding completion is
        // failed so callers never hang on a dead process.
        let reader_server = name.to_string();
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buffer = LineBuffer::new();
            let mut chunk = vec![0_u8; 8192];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.push(&chunk[..n]);
                        while let Some(line) = buffer.next_line() {
                            match classify_line(&line) {
                                Inbound::Response(response) => {
                                    let id = response.id;
                                    if !reader_pending.resolve(id, response.into_result()).await {
                                        debug!(
                                            server = %reader_server,
                                            id,
                                            "Dropping response with no pending request"
                                        );
                                    }
                                }
                                Inbound::Noise => {
                                    if !line.is_empty() {
                                        debug!(
                                            server = %reader_server,
                                            line = %line,
                                            "Non-protocol output on stdout"
                                        );
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(server = %reader_server, error = %e, "Error reading stdout");
                        break;
                    }
                }
            }
            reader_pending.close().await;
            debug!(server = %reader_server, "stdout reader finished");
            on_exit.await;
        });

        // Stderr drain for diagnostics.
        if let Some(stderr) = stderr {
            let stderr_server = name.to_string();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(server = %stderr_server, "stderr: {}", line);
                }
                debug!(server = %stderr_server, "stderr reader finished");
            });
        }

        Ok(conn)
    }

    /// The pending-completion table for this connection.
    pub(crate) fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Queue one wire line for the subprocess's stdin.
    pub(crate) async fn send_line(&self, line: String) -> Result<(), BridgeError> {
        self.stdin_tx
            .send(line)
            .await
            .map_err(|_| BridgeError::ConnectionClosed {
                server: self.server.clone(),
            })
    }

    /// Terminate the subprocess: fail outstanding requests, send SIGINT,
    /// and SIGKILL after `timeout` if it has not exited. Idempotent.
    pub(crate) async fn shutdown(&self, timeout: Duration) {
        self.pending.close().await;

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        debug!(server = %self.server, "Terminating tool server");

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid process ID obtained from our own Child
            // handle. kill(2) with SIGINT is safe to call on any owned
            // subprocess.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(server = %self.server, pid, error = %err, "Failed to send SIGINT");
            }
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(server = %self.server, ?status, "Tool server exited gracefully");
            }
            Ok(Err(e)) => {
                warn!(server = %self.server, error = %e, "Error waiting for tool server");
                child.kill().await.ok();
            }
            Err(_) => {
                warn!(server = %self.server, "Timeout waiting for graceful shutdown, killing");
                child.kill().await.ok();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use toolgate_core::ServerConfig;

    fn noop_hook(_conn: Weak<Connection>) -> ExitHook {
        Box::pin(async {})
    }

    #[tokio::test]
    async fn spawn_failure_reports_server_name() {
        let config = ServerConfig::new("/nonexistent/tool-server-binary");
        let Err(err) = Connection::spawn("ghost", &config, noop_hook) else {
            panic!("spawn of a nonexistent binary must fail");
        };
        match err {
            BridgeError::SpawnFailed { server, .. } => assert_eq!(server, "ghost"),
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let config = ServerConfig::new("/bin/cat");
        let Ok(conn) = Connection::spawn("cat", &config, noop_hook) else {
            panic!("spawning cat should succeed");
        };
        conn.shutdown(Duration::from_secs(2)).await;
        // Second shutdown finds no child and returns immediately.
        conn.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn registration_fails_after_shutdown() {
        let config = ServerConfig::new("/bin/cat");
        let Ok(conn) = Connection::spawn("cat", &config, noop_hook) else {
            panic!("spawning cat should succeed");
        };
        conn.shutdown(Duration::from_secs(2)).await;
        assert!(conn.pending().register().await.is_none());
    }
}
