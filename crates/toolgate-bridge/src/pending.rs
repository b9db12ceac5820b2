//! Pending-completion table: in-flight request ids awaiting a response.
//!
//! Each id resolves at most once. Response, timeout and connection loss all
//! remove the slot; whichever fires first wins and the loser's lookup finds
//! nothing.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use toolgate_core::rpc::RpcError;

/// Payload delivered to a pending completion: the response's result or the
/// server's structured error.
pub(crate) type Completion = std::result::Result<Value, RpcError>;

struct TableState {
    next_id: u64,
    /// `None` once the connection is gone; registrations fail fast.
    slots: Option<HashMap<u64, oneshot::Sender<Completion>>>,
}

/// Table of in-flight requests for one connection.
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                next_id: 1,
                slots: Some(HashMap::new()),
            }),
        }
    }

    /// Allocate the next request id and register a completion under it.
    ///
    /// Returns `None` if the table has been closed (connection gone).
    pub(crate) async fn register(&self) -> Option<(u64, oneshot::Receiver<Completion>)> {
        let mut state = self.state.lock().await;
        state.slots.as_ref()?;
        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = oneshot::channel();
        if let Some(slots) = state.slots.as_mut() {
            slots.insert(id, tx);
        }
        Some((id, rx))
    }

    /// Resolve the completion registered under `id`, if still present.
    ///
    /// Returns `false` for an unknown or already-settled id (late response
    /// after timeout, duplicate response): the caller drops it silently.
    pub(crate) async fn resolve(&self, id: u64, completion: Completion) -> bool {
        let mut state = self.state.lock().await;
        let Some(tx) = state.slots.as_mut().and_then(|slots| slots.remove(&id)) else {
            return false;
        };
        drop(state);
        // The receiver may have been dropped by a caller that gave up;
        // the request is settled either way.
        let _ = tx.send(completion);
        true
    }

    /// Remove a slot without resolving it (timeout or send failure).
    pub(crate) async fn abandon(&self, id: u64) -> bool {
        let mut state = self.state.lock().await;
        state
            .slots
            .as_mut()
            .and_then(|slots| slots.remove(&id))
            .is_some()
    }

    /// Close the table: every outstanding completion's sender is dropped,
    /// failing its receiver, and later registrations are refused.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(slots) = state.slots.take() {
            if !slots.is_empty() {
                debug!(outstanding = slots.len(), "Failing pending requests on close");
            }
        }
    }

    /// Number of in-flight requests.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.state
            .lock()
            .await
            .slots
            .as_ref()
            .map_or(0, HashMap::len)
    }
}
