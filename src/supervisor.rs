//! Supervisor Loop (§4.E): periodically closes idle connections and sweeps
//! expired sessions, and watches for SIGINT/SIGTERM to drive a clean
//! shutdown of the whole gateway.

use crate::policy::PolicyEngine;
use crate::server::MessageServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sweeps run on this cadence (§4.E). Sleeps in smaller slices so the active
/// flag is observed within 10s of being cleared.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const SLEEP_GRANULARITY: Duration = Duration::from_secs(10);

pub struct SupervisorLoop {
    server: Arc<MessageServer>,
    policy: Arc<PolicyEngine>,
    inactivity_limit: Duration,
    active: Arc<AtomicBool>,
}

impl SupervisorLoop {
    pub fn new(server: Arc<MessageServer>, policy: Arc<PolicyEngine>, inactivity_limit: Duration) -> Self {
        SupervisorLoop {
            server,
            policy,
            inactivity_limit,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Runs sweeps until `shutdown` is called. §4.E orders idle-connection
    /// sweep before session-inactivity sweep on each tick.
    pub async fn run(&self) {
        while self.active.load(Ordering::Relaxed) {
            self.sleep_one_tick().await;
            if !self.active.load(Ordering::Relaxed) {
                break;
            }

            let closed = self.server.idle_sweep().await;
            if closed > 0 {
                debug!(closed, "idle connection sweep");
            }

            match self.policy.inactivity_sweep(self.inactivity_limit).await {
                Ok(removed) if removed > 0 => info!(removed, "inactivity sweep"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "inactivity sweep failed"),
            }
        }
        info!("supervisor loop stopped");
    }

    async fn sleep_one_tick(&self) {
        let mut remaining = SWEEP_INTERVAL;
        while remaining > Duration::ZERO && self.active.load(Ordering::Relaxed) {
            let slice = remaining.min(SLEEP_GRANULARITY);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }

    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

/// Blocks until SIGINT or SIGTERM, then signals every component to stop
/// (§4.E graceful shutdown).
pub async fn wait_for_shutdown_signal(server: &MessageServer, supervisor: &SupervisorLoop) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
        info!("received Ctrl-C, shutting down");
    }

    server.shutdown();
    supervisor.shutdown();
}
