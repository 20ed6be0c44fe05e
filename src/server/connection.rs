//! Per-connection lifecycle tracking (§4.D, §5).
//!
//! The server keeps a list of active connections per channel, each tagged
//! with `last_activity` (set on every successful recv). `idle_sweep` closes
//! any connection idle past the configured timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

static NEXT_CONNECTION_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

struct ConnectionEntry {
    last_activity: Instant,
    /// Set by `idle_sweep` to ask the connection task to stop. The task
    /// observes it on its next recv/select tick.
    close_requested: Arc<AtomicBool>,
}

/// Per-channel registry of active connections (§5 "Connection lists —
/// per-channel mutex around append/remove").
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, ConnectionEntry>>,
}

pub struct ConnectionHandle {
    pub id: u64,
    pub close_requested: Arc<AtomicBool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self) -> ConnectionHandle {
        let id = next_connection_id();
        let close_requested = Arc::new(AtomicBool::new(false));
        let mut connections = self.connections.lock().await;
        connections.insert(
            id,
            ConnectionEntry {
                last_activity: Instant::now(),
                close_requested: close_requested.clone(),
            },
        );
        ConnectionHandle { id, close_requested }
    }

    pub async fn touch(&self, id: u64) {
        let mut connections = self.connections.lock().await;
        if let Some(entry) = connections.get_mut(&id) {
            entry.last_activity = Instant::now();
        }
    }

    pub async fn remove(&self, id: u64) {
        self.connections.lock().await.remove(&id);
    }

    /// Closes (flags for close) every connection idle past `timeout`
    /// (§4.D "closed ... by idle_sweep when now - last_activity > 300s").
    pub async fn idle_sweep(&self, timeout: Duration) -> usize {
        let connections = self.connections.lock().await;
        let mut closed = 0;
        for (id, entry) in connections.iter() {
            if entry.last_activity.elapsed() > timeout {
                entry.close_requested.store(true, Ordering::Relaxed);
                debug!(connection_id = id, "idle connection flagged for close");
                closed += 1;
            }
        }
        closed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_touch_and_remove() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register().await;
        assert_eq!(registry.len().await, 1);
        registry.touch(handle.id).await;
        registry.remove(handle.id).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn idle_sweep_flags_stale_connections() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register().await;
        let closed = registry.idle_sweep(Duration::from_secs(0)).await;
        assert_eq!(closed, 1);
        assert!(handle.close_requested.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn idle_sweep_spares_fresh_connections() {
        let registry = ConnectionRegistry::new();
        let _handle = registry.register().await;
        let closed = registry.idle_sweep(Duration::from_secs(300)).await;
        assert_eq!(closed, 0);
    }
}
