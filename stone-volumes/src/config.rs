// SPDX-License-Identifier: GPL-3.0-only

//! Service configuration (`/etc/stone/stone.toml`)
//!
//! Every field has a default, so a missing file or a partial one is fine:
//!
//! ```toml
//! [volumes]
//! default_size = 10737418240
//!
//! [quota]
//! enabled = true
//! id_min = 20971521
//! id_max = 23068672
//!
//! [service]
//! bus = "system"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stone_sys::QuotaConfig;
use stone_types::{DiskInfo, MediaType};
use tracing::info;

use crate::error::{Result, VolumeError};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/stone/stone.toml";
pub const DEFAULT_VOLUME_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_DRIVER_NAME: &str = "stone";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub volumes: VolumesConfig,
    pub quota: QuotaConfig,
    pub service: ServiceConfig,
}

impl Config {
    /// Load `path`; an absent file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(crate::error::io_error(path))?;
        let config = Self::parse(&content).map_err(|reason| VolumeError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let config: Config = toml::from_str(content).map_err(|error| error.to_string())?;
        if config.quota.id_min > config.quota.id_max {
            return Err(format!(
                "quota.id_min ({}) is above quota.id_max ({})",
                config.quota.id_min, config.quota.id_max
            ));
        }
        if config.volumes.default_size == 0 {
            return Err("volumes.default_size must be positive".to_string());
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumesConfig {
    /// Size in bytes of volumes created without a `size` option
    pub default_size: u64,

    /// Driver name recorded in each volume's metadata
    pub driver_name: String,

    /// Disks to place volumes on instead of discovering them with `df`
    pub disks: Vec<DeclaredDisk>,
}

impl Default for VolumesConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_VOLUME_SIZE,
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            disks: Vec::new(),
        }
    }
}

/// A `[[volumes.disks]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDisk {
    pub device: String,
    pub fs_type: String,
    pub media_type: MediaType,
    pub mount_point: PathBuf,
    pub size: u64,
}

impl From<&DeclaredDisk> for DiskInfo {
    fn from(disk: &DeclaredDisk) -> Self {
        DiskInfo::new(
            disk.device.clone(),
            disk.fs_type.clone(),
            disk.media_type,
            disk.mount_point.clone(),
            disk.size,
            0,
            0,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bus: BusKind,
    pub bus_name: String,
    pub object_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            bus_name: "org.stone.Volumes".to_string(),
            object_path: "/org/stone/Volumes".to_string(),
        }
    }
}
