// SPDX-License-Identifier: GPL-3.0-only

//! Quota-bounded volumes for the Stone volume service
//!
//! - **selector**: picks a disk for a new volume from the current inventory
//! - **volume**: a volume, its `volume.json` and its mount reference count
//! - **manager**: create / remove / restore, and the registry of live volumes
//! - **config**: the `stone.toml` service configuration

pub mod config;
pub mod error;
pub mod manager;
pub mod options;
pub mod registry;
pub mod selector;
pub mod volume;

pub use config::{BusKind, Config, DEFAULT_CONFIG_PATH, DeclaredDisk, ServiceConfig, VolumesConfig};
pub use error::{ErrorKind, Result, VolumeError};
pub use manager::VolumeManager;
pub use options::{VolumeOptions, validate_name};
pub use selector::{Placement, choose_disk};
pub use volume::{MountState, Volume, VolumeRecord};
