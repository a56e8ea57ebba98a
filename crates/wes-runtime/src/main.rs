// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WES Runtime - Run Lifecycle Daemon
//!
//! Loads configuration, settles runs interrupted by a previous process and
//! keeps the retention worker going until Ctrl-C. An HTTP front end embeds
//! the same runtime through `WesRuntime::state()`.

use tracing::{info, warn};

use wes_runtime::config::Config;
use wes_runtime::runtime::{WesRuntime, WesRuntimeBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wes_runtime=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        run_dir = %config.run_dir.display(),
        executor = %config.executor,
        retention_hours = ?config.retention.map(|d| d.as_secs() / 3600),
        "Starting WES runtime"
    );

    let runtime: WesRuntime = WesRuntimeBuilder::from_config(&config)?
        .build()?
        .start()
        .await?;

    info!("WES runtime ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("WES runtime shut down");

    Ok(())
}
