// SPDX-License-Identifier: GPL-3.0-only

//! CLI around stone-sys for inspecting disks and quotas by hand

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stone_sys::{
    DiskInventory, MountTable, ProcMounts, QuotaConfig, QuotaManager, SystemInventory,
    SystemRunner,
};
use stone_types::{bytes_to_pretty, parse_size};

#[derive(Parser)]
#[command(name = "stone-disks")]
#[command(about = "Inspect usable disks and directory quotas", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List disks usable for volume placement as JSON
    List,
    /// Directory quota operations
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },
}

#[derive(Subcommand)]
enum QuotaCommands {
    /// Show the hard limit of a directory
    Get {
        path: PathBuf,
    },
    /// Set the hard limit of a directory (e.g. 5000000000, 10G)
    Set {
        path: PathBuf,
        size: String,
    },
    /// Show the quota id bound to a directory
    Id {
        path: PathBuf,
    },
}

fn fs_type_of(path: &Path) -> Result<String> {
    let mounts = ProcMounts;
    let device = mounts.device_id(path)?;
    let entry = mounts
        .entry_for_device(device)?
        .with_context(|| format!("no mount entry for {}", path.display()))?;
    Ok(entry.fs_type)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let inventory = SystemInventory::new(Arc::new(SystemRunner));
            let disks = inventory.disks()?;
            println!("{}", serde_json::to_string_pretty(&disks)?);
        }
        Commands::Quota { command } => {
            let quotas = QuotaManager::system(QuotaConfig::default());
            match command {
                QuotaCommands::Get { path } => {
                    let backend = quotas.backend_for_fs(&fs_type_of(&path)?);
                    let size = backend.get_quota(&path)?;
                    println!(
                        "{}",
                        serde_json::json!({
                            "path": path,
                            "backend": backend.name(),
                            "size": size,
                            "pretty": bytes_to_pretty(&size, false),
                        })
                    );
                }
                QuotaCommands::Set { path, size } => {
                    let bytes = parse_size(&size)?;
                    let backend = quotas.backend_for_fs(&fs_type_of(&path)?);
                    backend.set_quota(&path, bytes)?;
                    println!("{{\"success\": true}}");
                }
                QuotaCommands::Id { path } => {
                    let backend = quotas.backend_for_fs(&fs_type_of(&path)?);
                    let id = backend.quota_id(&path)?;
                    println!("{}", serde_json::json!({ "path": path, "quota_id": id }));
                }
            }
        }
    }

    Ok(())
}
