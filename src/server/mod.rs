//! Dual-channel message server (§4.D).
//!
//! Two independent TCP acceptors (control, data) dispatch newline-delimited
//! JSON requests by `command` through a registered handler table. Accept
//! loops poll at 1s to observe shutdown (§5); connection startup retries
//! bind failures with exponential back-off (§4.D "Startup").

pub mod connection;
pub mod handlers;
pub mod protocol;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::policy::PolicyEngine;
use connection::ConnectionRegistry;
use handlers::{handler_table, HandlerFn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const BIND_RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
    Duration::from_secs(16),
    Duration::from_secs(32),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Control,
    Data,
}

pub struct MessageServer {
    config: Config,
    policy: Arc<PolicyEngine>,
    handlers: Arc<HashMap<&'static str, HandlerFn>>,
    control_connections: Arc<ConnectionRegistry>,
    data_connections: Arc<ConnectionRegistry>,
    active: Arc<AtomicBool>,
}

impl MessageServer {
    pub fn new(config: Config, policy: Arc<PolicyEngine>) -> Self {
        MessageServer {
            config,
            policy,
            handlers: Arc::new(handler_table()),
            control_connections: Arc::new(ConnectionRegistry::new()),
            data_connections: Arc::new(ConnectionRegistry::new()),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Binds both channels (with retry) and runs their accept loops until
    /// the active flag clears.
    pub async fn run(&self) -> Result<()> {
        let control_listener =
            bind_with_retry(([0, 0, 0, 0], self.config.control_port).into()).await?;
        let data_listener = bind_with_retry(([0, 0, 0, 0], self.config.data_port).into()).await?;

        info!(port = self.config.control_port, "control channel listening");
        info!(port = self.config.data_port, "data channel listening");

        let control = self.accept_loop(control_listener, Channel::Control, self.control_connections.clone());
        let data = self.accept_loop(data_listener, Channel::Data, self.data_connections.clone());

        tokio::join!(control, data);
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener, channel: Channel, registry: Arc<ConnectionRegistry>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let policy = self.policy.clone();
                            let handlers = self.handlers.clone();
                            let registry = registry.clone();
                            let idle_timeout = self.config.idle_conn_timeout;
                            tokio::spawn(async move {
                                handle_connection(stream, peer, channel, policy, handlers, registry, idle_timeout).await;
                            });
                        }
                        Err(e) => {
                            warn!(?channel, error = %e, "accept error");
                        }
                    }
                }
                _ = sleep(ACCEPT_POLL_INTERVAL) => {
                    if !self.active.load(Ordering::Relaxed) {
                        debug!(?channel, "accept loop observed shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// §4.E driver calls this; closes every connection idle past the
    /// configured timeout, on both channels.
    pub async fn idle_sweep(&self) -> usize {
        self.control_connections.idle_sweep(self.config.idle_conn_timeout).await
            + self.data_connections.idle_sweep(self.config.idle_conn_timeout).await
    }

    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

async fn bind_with_retry(addr: SocketAddr) -> Result<TcpListener> {
    let mut last_err = None;
    if let Ok(listener) = TcpListener::bind(addr).await {
        return Ok(listener);
    }
    for delay in BIND_RETRY_DELAYS {
        warn!(%addr, ?delay, "bind failed, retrying");
        sleep(delay).await;
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::Bind {
        addr: addr.to_string(),
        source: last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "bind failed")),
    })
}

/// Serializes requests on a single connection: one dispatch (including its
/// response) completes before the next recv is processed (§5 "Ordering
/// guarantees").
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    channel: Channel,
    policy: Arc<PolicyEngine>,
    handlers: Arc<HashMap<&'static str, HandlerFn>>,
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Duration,
) {
    let handle = registry.register().await;
    debug!(?channel, %peer, connection_id = handle.id, "connection accepted");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        if handle.close_requested.load(Ordering::Relaxed) {
            debug!(?channel, connection_id = handle.id, "connection closed by idle sweep");
            break;
        }

        let line = match tokio::time::timeout(idle_timeout, protocol::read_request(&mut reader)).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                debug!(?channel, connection_id = handle.id, "connection closed: eof");
                break;
            }
            Ok(Err(e)) => {
                debug!(?channel, connection_id = handle.id, error = %e, "connection closed: recv error");
                break;
            }
            Err(_) => {
                debug!(?channel, connection_id = handle.id, "connection closed: idle timeout");
                break;
            }
        };

        registry.touch(handle.id).await;

        let (response, id) = match protocol::parse_request(&line) {
            Ok(request) => {
                let id = request.id.clone();
                (dispatch(&handlers, &policy, request, peer.ip().to_string()).await, id)
            }
            Err(e) => {
                debug!(?channel, connection_id = handle.id, error = %e, "malformed request");
                (protocol::invalid_format_response(), None)
            }
        };

        if let Err(e) = protocol::write_response(&mut write_half, response, id).await {
            debug!(?channel, connection_id = handle.id, error = %e, "connection closed: send error");
            break;
        }
    }

    let _ = write_half.shutdown().await;
    registry.remove(handle.id).await;
}

async fn dispatch(
    handlers: &HashMap<&'static str, HandlerFn>,
    policy: &Arc<PolicyEngine>,
    request: protocol::Request,
    client_ip: String,
) -> serde_json::Value {
    match handlers.get(request.command.as_str()) {
        Some(handler) => handler(policy.clone(), request.params, client_ip).await,
        None => protocol::unknown_command_response(&request.command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};

    async fn test_server() -> (MessageServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let visibility = Arc::new(crate::visibility::PortVisibilitySupervisor::new());
        let policy = Arc::new(PolicyEngine::new(store, visibility));
        let mut config = Config::from_env().unwrap();
        config.control_port = 0;
        config.data_port = 0;
        (MessageServer::new(config, policy), dir)
    }

    #[tokio::test]
    async fn dispatch_routes_known_command() {
        let (server, _dir) = test_server().await;
        let request = protocol::parse_request(r#"{"command":"get_ports"}"#).unwrap();
        let response = dispatch(&server.handlers, &server.policy, request, "127.0.0.1".to_string()).await;
        assert_eq!(response["status"], "success");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_command() {
        let (server, _dir) = test_server().await;
        let request = protocol::parse_request(r#"{"command":"frobnicate"}"#).unwrap();
        let response = dispatch(&server.handlers, &server.policy, request, "127.0.0.1".to_string()).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["message"], "Unknown command: frobnicate");
    }

    #[tokio::test]
    async fn single_connection_request_response_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let visibility = Arc::new(crate::visibility::PortVisibilitySupervisor::new());
        let policy = Arc::new(PolicyEngine::new(store, visibility));
        let mut config = Config::from_env().unwrap();
        config.control_port = 0;
        config.data_port = 0;
        let server = Arc::new(MessageServer::new(config, policy));

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = server.control_connections.clone();
        let policy = server.policy.clone();
        let handlers = server.handlers.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            handle_connection(stream, peer, Channel::Control, policy, handlers, registry, Duration::from_secs(300)).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"command\":\"get_ports\"}\n").await.unwrap();

        let mut reader = TokioBufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["status"], "success");
    }
}
