//! Port Visibility Supervisor (§4.C).
//!
//! Owns one RST-on-accept listener worker per port whose policy status is
//! `inactive`. Each worker binds `0.0.0.0:port` with address reuse, accepts
//! with a short poll interval, and closes every accepted connection with
//! `SO_LINGER(on=1, timeout=0)` so the kernel emits a TCP reset instead of a
//! graceful FIN — masking the port from a naive scanner (I3/I4).

use crate::store::types::PortStatus;
use crate::store::Store;
use socket2::{Domain, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const BIND_ERROR_BACKOFF: Duration = Duration::from_millis(500);

struct Worker {
    handle: JoinHandle<()>,
}

/// Owns the live set of RST-on-accept workers, keyed by port (§5 "Port
/// Visibility workers — map keyed by port, guarded by a single mutex").
pub struct PortVisibilitySupervisor {
    workers: Mutex<HashMap<u16, Worker>>,
}

impl PortVisibilitySupervisor {
    pub fn new() -> Self {
        PortVisibilitySupervisor {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Reconciles every known Port in the Store against its target
    /// visibility state. Called once at startup.
    pub async fn sync_all(&self, store: &Store) -> crate::error::Result<()> {
        let ports = store.load_ports().await?;
        for port in &ports {
            self.set_visibility(port.port, port.status == PortStatus::Active)
                .await;
        }
        Ok(())
    }

    /// §4.C `set_visibility`. Transitioning to inactive starts a worker
    /// (tearing down any previous worker for the port first); transitioning
    /// to active stops it.
    pub async fn set_visibility(&self, port: u16, active: bool) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.remove(&port) {
            worker.handle.abort();
            debug!(port, "port visibility worker torn down");
        }
        if !active {
            let handle = tokio::spawn(rst_listener_loop(port));
            workers.insert(port, Worker { handle });
            info!(port, "port visibility worker started (rst-on-accept)");
        }
    }

    #[cfg(test)]
    pub async fn is_running(&self, port: u16) -> bool {
        self.workers.lock().await.contains_key(&port)
    }
}

impl Drop for PortVisibilitySupervisor {
    fn drop(&mut self) {
        if let Ok(mut workers) = self.workers.try_lock() {
            for (_, worker) in workers.drain() {
                worker.handle.abort();
            }
        }
    }
}

async fn rst_listener_loop(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = match bind_reuseaddr(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(port, error = %e, "port visibility worker failed to bind, leaving port visible");
            return;
        }
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(port, %peer, "rst-on-accept connection closed");
                        reset_on_close(stream);
                    }
                    Err(e) => {
                        warn!(port, error = %e, "accept error on visibility worker");
                        sleep(BIND_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = sleep(ACCEPT_POLL_INTERVAL) => {}
        }
    }
}

async fn bind_reuseaddr(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// Sets `SO_LINGER(on=1, timeout=0)` so dropping the stream sends a TCP
/// reset rather than a graceful FIN.
fn reset_on_close(stream: tokio::net::TcpStream) {
    if let Ok(std_stream) = stream.into_std() {
        let socket = Socket::from(std_stream);
        if let Err(e) = socket.set_linger(Some(Duration::from_secs(0))) {
            warn!(error = %e, "failed to set SO_LINGER for rst-on-accept");
        }
        // Dropping `socket` here closes the fd with linger still set.
    }
}
