/*
 * HoneyTrap Gateway
 * Copyright (C) 2025 ladvien
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

mod config;
mod error;
mod policy;
mod server;
mod store;
mod supervisor;
mod time;
mod visibility;

use config::Config;
use error::Result;
use policy::PolicyEngine;
use server::MessageServer;
use std::sync::Arc;
use store::Store;
use supervisor::SupervisorLoop;
use tracing::info;
use visibility::PortVisibilitySupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("honeytrap-gateway v{}", env!("CARGO_PKG_VERSION"));
        println!("\nDeception-oriented access gateway.");
        println!("\nEnvironment variables:");
        println!("  HONEYTRAP_CONTROL_PORT             Control channel port (default: 5000)");
        println!("  HONEYTRAP_DATA_PORT                Data channel port (default: 5001)");
        println!("  HONEYTRAP_STORE_DIR                Collection store directory (default: ./data)");
        println!("  HONEYTRAP_INACTIVITY_LIMIT_SECS    Session inactivity limit (default: 300)");
        println!("  HONEYTRAP_IDLE_CONN_TIMEOUT_SECS   Idle connection timeout (default: 300)");
        println!("  RUST_LOG                           Logging level (default: info)");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(?config, "starting honeytrap-gateway");

    let store = Arc::new(Store::open(config.store_dir.clone()).await?);

    let visibility = Arc::new(PortVisibilitySupervisor::new());
    visibility.sync_all(&store).await?;

    let policy = Arc::new(PolicyEngine::new(store, visibility.clone()));
    let message_server = Arc::new(MessageServer::new(config.clone(), policy.clone()));
    let supervisor = Arc::new(SupervisorLoop::new(
        message_server.clone(),
        policy,
        config.inactivity_limit,
    ));

    let server_task = {
        let message_server = message_server.clone();
        tokio::spawn(async move { message_server.run().await })
    };
    let supervisor_task = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run().await })
    };

    supervisor::wait_for_shutdown_signal(&message_server, &supervisor).await;

    let _ = supervisor_task.await;
    match server_task.await {
        Ok(result) => result?,
        Err(e) => info!(error = %e, "message server task join failed during shutdown"),
    }

    // Holds the visibility workers alive until shutdown; their Drop impl
    // aborts every listener.
    drop(visibility);

    info!("honeytrap-gateway stopped");
    Ok(())
}
