// SPDX-License-Identifier: GPL-3.0-only

//! Stone volume service - D-Bus service for quota-bounded local volumes
//!
//! Restores every volume found on the host's disks, then serves
//! Create/Remove/Mount/Unmount/Path/Get/List on the configured bus.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use stone_sys::{DiskInventory, QuotaManager, StaticInventory, SystemInventory, SystemRunner};
use stone_types::DiskInfo;
use stone_volumes::{BusKind, Config, DEFAULT_CONFIG_PATH, VolumeManager};
use tracing_subscriber::{EnvFilter, fmt};
use zbus::connection::Builder as ConnectionBuilder;

mod driver;
mod error;

use driver::VolumeDriver;

#[derive(Parser)]
#[command(name = "stone-service")]
#[command(about = "D-Bus service for quota-bounded local volumes", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve on the session bus instead of the configured one
    #[arg(long)]
    session: bool,
}

fn build_manager(config: Config) -> Result<VolumeManager> {
    let inventory: Arc<dyn DiskInventory> = if config.volumes.disks.is_empty() {
        Arc::new(SystemInventory::new(Arc::new(SystemRunner)))
    } else {
        tracing::info!("Using {} disks declared in configuration", config.volumes.disks.len());
        Arc::new(StaticInventory::new(
            config.volumes.disks.iter().map(DiskInfo::from).collect(),
        ))
    };

    let quotas = QuotaManager::system(config.quota);
    Ok(VolumeManager::open(config.volumes, inventory, quotas)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("stone_service=info,stone_volumes=info,stone_sys=info,warn")
        }))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Stone volume service v{}", env!("CARGO_PKG_VERSION"));

    // Check if running as root
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("Stone volume service must run as root");
        anyhow::bail!("Service must run with root privileges");
    }

    let config = Config::load(&cli.config)?;
    let service = config.service.clone();
    let bus = if cli.session { BusKind::Session } else { service.bus };

    let manager = tokio::task::spawn_blocking(move || build_manager(config)).await??;
    let driver = VolumeDriver::new(Arc::new(manager));

    let builder = match bus {
        BusKind::System => ConnectionBuilder::system()?,
        BusKind::Session => ConnectionBuilder::session()?,
    };
    let _connection = builder
        .name(service.bus_name.as_str())?
        .serve_at(service.object_path.as_str(), driver)?
        .build()
        .await?;

    tracing::info!(
        "Serving org.stone.Volumes1 as {} at {} on the {:?} bus",
        service.bus_name,
        service.object_path,
        bus
    );

    // Keep service running until shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    tracing::info!("Stone volume service shutting down");
    Ok(())
}
