// SPDX-License-Identifier: GPL-3.0-only

//! Volumes and their on-disk metadata
//!
//! A volume lives at `<mount point>/stone_volume/<name>`; the served
//! directory is its `_data` child, and `volume.json` next to it records
//! everything needed to rebuild the volume after a restart.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stone_sys::QuotaBackend;
use stone_types::{DiskInfo, VolumeSummary};
use tracing::debug;

use crate::error::{Result, VolumeError, io_error};
use crate::options::VolumeOptions;
use crate::selector::Placement;

pub const VOLUME_ROOT: &str = "stone_volume";
pub const DATA_DIR: &str = "_data";
pub const METADATA_FILE: &str = "volume.json";
pub const VOLUME_TYPE: &str = "local";

/// Directory holding every volume on a disk.
pub fn volume_root(mount_point: &Path) -> PathBuf {
    mount_point.join(VOLUME_ROOT)
}

/// Mount reference count; `mounted` is true exactly when `count > 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountState {
    pub count: u64,
    pub mounted: bool,
}

/// Content of `volume.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub volume_type: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub disk_id: String,
    #[serde(default)]
    pub volume_path: PathBuf,
    #[serde(default)]
    pub data_path: PathBuf,
    pub size: u64,
    #[serde(default)]
    pub io_class: i64,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub quota_id: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub active: MountState,
}

impl VolumeRecord {
    pub fn new(driver: &str, name: &str, options: &VolumeOptions, disk: &DiskInfo) -> Self {
        let volume_path = volume_root(&disk.mount_point).join(name);
        Self {
            name: name.to_string(),
            driver: driver.to_string(),
            volume_type: VOLUME_TYPE.to_string(),
            fs_type: disk.fs_type.clone(),
            disk_id: disk.id.clone(),
            data_path: volume_path.join(DATA_DIR),
            volume_path,
            size: options.size,
            io_class: options.io_class,
            exclusive: options.exclusive,
            quota_id: None,
            created_at: Utc::now(),
            active: MountState::default(),
        }
    }

    /// Overwrite `volume.json` in the volume directory.
    pub fn write(&self) -> Result<()> {
        let path = self.volume_path.join(METADATA_FILE);
        let data = serde_json::to_vec_pretty(self)?;

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .and_then(|mut file| file.write_all(&data))
            .map_err(io_error(&path))?;

        debug!("Persisted {}", path.display());
        Ok(())
    }

    /// Read and check `volume.json` of the volume at `volume_path`.
    pub fn read(volume_path: &Path) -> Result<Self> {
        let path = volume_path.join(METADATA_FILE);
        if !path.is_file() {
            return Err(VolumeError::BadFormat {
                path,
                reason: format!("no {METADATA_FILE}"),
            });
        }

        let data = fs::read(&path).map_err(io_error(&path))?;
        let mut record: VolumeRecord =
            serde_json::from_slice(&data).map_err(|error| VolumeError::BadFormat {
                path: path.clone(),
                reason: error.to_string(),
            })?;

        let data_dir = volume_path.join(DATA_DIR);
        if !data_dir.is_dir() {
            return Err(VolumeError::MissingDataDir(data_dir));
        }

        let missing: Vec<&str> = [
            ("name", record.name.is_empty()),
            ("volume_path", record.volume_path.as_os_str().is_empty()),
            ("data_path", record.data_path.as_os_str().is_empty()),
            ("disk_id", record.disk_id.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();
        if !missing.is_empty() {
            return Err(VolumeError::BadFormat {
                path,
                reason: format!("empty fields: {}", missing.join(", ")),
            });
        }

        record.active.mounted = record.active.count > 0;
        Ok(record)
    }
}

/// A live volume: its record, its quota backend and its mount state
pub struct Volume {
    record: VolumeRecord,
    quota: Arc<dyn QuotaBackend>,
    active: Mutex<MountState>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("record", &self.record)
            .field("quota", &self.quota.name())
            .field("active", &self.mount_state())
            .finish()
    }
}

impl Volume {
    pub fn new(record: VolumeRecord, quota: Arc<dyn QuotaBackend>) -> Self {
        let active = record.active;
        Self {
            record,
            quota,
            active: Mutex::new(active),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn volume_path(&self) -> &Path {
        &self.record.volume_path
    }

    /// The served directory
    pub fn data_path(&self) -> &Path {
        &self.record.data_path
    }

    pub fn disk_id(&self) -> &str {
        &self.record.disk_id
    }

    pub fn quota(&self) -> &Arc<dyn QuotaBackend> {
        &self.quota
    }

    pub fn quota_id(&self) -> Option<u32> {
        self.record.quota_id
    }

    fn lock_active(&self) -> MutexGuard<'_, MountState> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mount_state(&self) -> MountState {
        *self.lock_active()
    }

    /// The record as it would be persisted now.
    pub fn record(&self) -> VolumeRecord {
        VolumeRecord {
            active: self.mount_state(),
            ..self.record.clone()
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            disk_id: self.record.disk_id.clone(),
            size: self.record.size,
            io_class: self.record.io_class,
            exclusive: self.record.exclusive,
        }
    }

    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            name: self.record.name.clone(),
            mountpoint: self.record.data_path.to_string_lossy().to_string(),
        }
    }

    /// Apply `change` to the mount state and persist it; the state is
    /// restored if persisting fails.
    fn update_active(&self, change: impl FnOnce(&mut MountState) -> Result<()>) -> Result<MountState> {
        let mut active = self.lock_active();
        let previous = *active;
        change(&mut *active)?;
        active.mounted = active.count > 0;

        let record = VolumeRecord {
            active: *active,
            ..self.record.clone()
        };
        if let Err(error) = record.write() {
            *active = previous;
            return Err(error);
        }
        Ok(*active)
    }

    /// Take a mount reference; returns the served directory.
    pub fn mount(&self) -> Result<PathBuf> {
        let state = self.update_active(|active| {
            active.count += 1;
            Ok(())
        })?;
        debug!("Mounted {} ({} references)", self.name(), state.count);
        Ok(self.record.data_path.clone())
    }

    /// Drop a mount reference.
    pub fn unmount(&self) -> Result<()> {
        let state = self.update_active(|active| {
            if active.count == 0 {
                return Err(VolumeError::NotMounted(self.record.name.clone()));
            }
            active.count -= 1;
            Ok(())
        })?;
        debug!("Unmounted {} ({} references)", self.name(), state.count);
        Ok(())
    }
}
