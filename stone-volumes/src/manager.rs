// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle
//!
//! `VolumeManager` places, creates, removes and restores volumes. Creation
//! order matters for crash recovery: the volume directory and `volume.json`
//! exist before the quota is applied, and any failure after the directory
//! was created removes it again.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stone_sys::{DiskInventory, QuotaBackend, QuotaManager};
use stone_types::VolumeSummary;
use tracing::{debug, info, warn};

use crate::config::VolumesConfig;
use crate::error::{Result, VolumeError, io_error};
use crate::options::{VolumeOptions, validate_name};
use crate::registry::{Registry, placements};
use crate::selector::choose_disk;
use crate::volume::{Volume, VolumeRecord, volume_root};

pub struct VolumeManager {
    config: VolumesConfig,
    inventory: Arc<dyn DiskInventory>,
    quotas: QuotaManager,
    registry: Registry,
}

impl VolumeManager {
    /// A manager with an empty registry; see [`VolumeManager::open`].
    pub fn new(config: VolumesConfig, inventory: Arc<dyn DiskInventory>, quotas: QuotaManager) -> Self {
        Self {
            config,
            inventory,
            quotas,
            registry: Registry::new(),
        }
    }

    /// Build a manager and restore every volume found on the current disks.
    pub fn open(
        config: VolumesConfig,
        inventory: Arc<dyn DiskInventory>,
        quotas: QuotaManager,
    ) -> Result<Self> {
        let manager = Self::new(config, inventory, quotas);
        let restored = manager.restore_all()?;
        info!("Restored {} volumes", restored);
        Ok(manager)
    }

    pub fn quotas(&self) -> &QuotaManager {
        &self.quotas
    }

    /// Restore the volume at `volume_path` from its `volume.json`.
    pub fn restore(&self, volume_path: &Path) -> Result<Volume> {
        let record = VolumeRecord::read(volume_path)?;
        let quota = self.quotas.backend_for_fs(&record.fs_type);

        if let Some(id) = record.quota_id {
            if self.quotas.config().enabled {
                self.quotas.ids().mark_used(id)?;
            }
        }

        debug!("Restored volume {} from {}", record.name, volume_path.display());
        Ok(Volume::new(record, quota))
    }

    /// Scan `<mount point>/stone_volume` on every disk and register each volume.
    /// Any volume that fails to restore aborts the scan.
    pub fn restore_all(&self) -> Result<usize> {
        let disks = self.inventory.disks()?;
        let mut volumes = self.registry.lock();
        let mut restored = 0;

        for disk in disks {
            let root = volume_root(&disk.mount_point);
            let entries = match fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(io_error(&root)(error)),
            };

            for entry in entries {
                let entry = entry.map_err(io_error(&root))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }

                let volume = self.restore(&path)?;
                let name = volume.name().to_string();
                if let Some(previous) = volumes.insert(name.clone(), Arc::new(volume)) {
                    warn!(
                        "Volume {} found twice, {} replaces {}",
                        name,
                        path.display(),
                        previous.volume_path().display()
                    );
                }
                restored += 1;
            }
        }

        Ok(restored)
    }

    /// Create a volume from driver options.
    pub fn create(&self, name: &str, opts: &HashMap<String, String>) -> Result<Arc<Volume>> {
        validate_name(name)?;
        let mut volumes = self.registry.lock();

        if volumes.contains_key(name) {
            return Err(VolumeError::AlreadyExists(name.to_string()));
        }

        let options = VolumeOptions::parse(opts, self.config.default_size)?;
        let disk = choose_disk(&options, self.inventory.disks()?, &placements(&volumes))?;
        let record = VolumeRecord::new(&self.config.driver_name, name, &options, &disk);

        let root = volume_root(&disk.mount_point);
        fs::create_dir_all(&root).map_err(io_error(&root))?;
        match fs::create_dir(&record.volume_path) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                return Err(VolumeError::PathExists(record.volume_path.clone()));
            }
            Err(error) => return Err(io_error(&record.volume_path)(error)),
        }

        let quota = self.quotas.backend_for_fs(&disk.fs_type);
        let volume_path = record.volume_path.clone();
        let record = match Self::provision(record, quota.as_ref()) {
            Ok(record) => record,
            Err(error) => {
                self.discard(&volume_path, quota.as_ref());
                return Err(error);
            }
        };

        info!(
            "Created volume {} on {} ({} bytes, {} quota, id {:?})",
            name,
            disk.mount_point.display(),
            record.size,
            quota.name(),
            record.quota_id
        );

        let volume = Arc::new(Volume::new(record, quota));
        volumes.insert(name.to_string(), volume.clone());
        Ok(volume)
    }

    /// Persist, apply the quota, create `_data`, persist the bound id.
    fn provision(mut record: VolumeRecord, quota: &dyn QuotaBackend) -> Result<VolumeRecord> {
        record.write()?;
        quota.set_quota(&record.volume_path, record.size)?;
        fs::create_dir(&record.data_path).map_err(io_error(&record.data_path))?;
        record.quota_id = quota.quota_id(&record.volume_path)?;
        record.write()?;
        Ok(record)
    }

    /// Undo a partial create.
    fn discard(&self, volume_path: &Path, quota: &dyn QuotaBackend) {
        let bound = quota.quota_id(volume_path).ok().flatten();
        if bound.is_some() {
            if let Err(error) = quota.remove_quota(volume_path) {
                warn!("Failed to lift quota of {}: {}", volume_path.display(), error);
            }
        }

        if let Err(error) = fs::remove_dir_all(volume_path) {
            warn!("Failed to remove {}: {}", volume_path.display(), error);
        }

        if let Some(id) = bound {
            self.quotas.ids().release(id);
        }
    }

    /// Remove a volume; its directory must still exist.
    pub fn remove(&self, name: &str) -> Result<()> {
        self.remove_with(name, false)
    }

    /// Remove a volume. With `force`, an already missing directory is not an error.
    pub fn remove_with(&self, name: &str, force: bool) -> Result<()> {
        let mut volumes = self.registry.lock();
        let volume = volumes
            .get(name)
            .cloned()
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        let volume_path = volume.volume_path();
        if !volume_path.exists() {
            if !force {
                return Err(VolumeError::PathMissing(volume_path.to_path_buf()));
            }
            warn!("Volume {} has no directory at {}, dropping it", name, volume_path.display());
            if let Some(id) = volume.quota_id() {
                self.quotas.ids().release(id);
            }
            volumes.remove(name);
            return Ok(());
        }

        let bound = volume.quota().quota_id(volume_path)?.or(volume.quota_id());
        volume.quota().remove_quota(volume_path)?;
        fs::remove_dir_all(volume_path).map_err(io_error(volume_path))?;
        if let Some(id) = bound {
            self.quotas.ids().release(id);
        }

        volumes.remove(name);
        info!("Removed volume {}", name);
        Ok(())
    }

    /// Registered volume by name
    pub fn volume(&self, name: &str) -> Result<Arc<Volume>> {
        self.registry
            .get(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    pub fn mount(&self, name: &str) -> Result<PathBuf> {
        self.volume(name)?.mount()
    }

    pub fn unmount(&self, name: &str) -> Result<()> {
        self.volume(name)?.unmount()
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.volume(name)?.data_path().to_path_buf())
    }

    pub fn get(&self, name: &str) -> Result<VolumeSummary> {
        Ok(self.volume(name)?.summary())
    }

    pub fn list(&self) -> Vec<VolumeSummary> {
        self.registry
            .snapshot()
            .iter()
            .map(|volume| volume.summary())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stone_sys::{FixedMounts, QuotaConfig, ScriptedRunner, StaticInventory};
    use stone_types::{DiskInfo, MediaType};

    struct Fixture {
        disk_root: tempfile::TempDir,
        disk: DiskInfo,
        manager: VolumeManager,
    }

    fn fixture(fs_type: &str) -> Fixture {
        let disk_root = tempfile::tempdir().unwrap();
        let disk = DiskInfo::new("/dev/sdb1", fs_type, MediaType::Ssd, disk_root.path(), 1 << 40, 0, 0);
        let runner = Arc::new(ScriptedRunner::new());
        let mounts = Arc::new(FixedMounts::new("/dev/sdb1", disk_root.path(), fs_type, &[]));
        let quotas = QuotaManager::new(QuotaConfig::default(), runner, mounts);
        let inventory = Arc::new(StaticInventory::new(vec![disk.clone()]));
        let manager = VolumeManager::new(VolumesConfig::default(), inventory, quotas);
        Fixture {
            disk_root,
            disk,
            manager,
        }
    }

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn create_lays_out_the_volume() {
        let fx = fixture("btrfs");
        let volume = fx.manager.create("db", &opts(&[("size", "1G")])).unwrap();

        let expected = fx.disk_root.path().join("stone_volume/db");
        assert_eq!(volume.volume_path(), expected);
        assert!(expected.join("_data").is_dir());
        assert!(expected.join("volume.json").is_file());
        assert_eq!(volume.disk_id(), fx.disk.id);
        assert_eq!(volume.quota().name(), "bare");
        assert_eq!(fx.manager.path("db").unwrap(), expected.join("_data"));
    }

    #[test]
    fn duplicate_and_invalid_names_are_rejected() {
        let fx = fixture("btrfs");
        fx.manager.create("db", &HashMap::new()).unwrap();

        assert!(matches!(
            fx.manager.create("db", &HashMap::new()),
            Err(VolumeError::AlreadyExists(_))
        ));
        assert!(matches!(
            fx.manager.create("../db", &HashMap::new()),
            Err(VolumeError::InvalidName(_))
        ));
        assert!(matches!(
            fx.manager.create("cache", &opts(&[("color", "red")])),
            Err(VolumeError::InvalidOption { .. })
        ));
        assert!(!fx.disk_root.path().join("stone_volume/cache").exists());
    }

    #[test]
    fn existing_directory_is_a_conflict() {
        let fx = fixture("btrfs");
        let stray = fx.disk_root.path().join("stone_volume/db");
        fs::create_dir_all(stray.join("keep")).unwrap();

        assert!(matches!(
            fx.manager.create("db", &HashMap::new()),
            Err(VolumeError::PathExists(_))
        ));
        assert!(stray.join("keep").is_dir());
        assert!(fx.manager.list().is_empty());
    }

    #[test]
    fn remove_deletes_the_tree() {
        let fx = fixture("btrfs");
        fx.manager.create("db", &HashMap::new()).unwrap();

        fx.manager.remove("db").unwrap();
        assert!(!fx.disk_root.path().join("stone_volume/db").exists());
        assert!(matches!(fx.manager.get("db"), Err(VolumeError::NotFound(_))));
        assert!(matches!(fx.manager.remove("db"), Err(VolumeError::NotFound(_))));
    }

    #[test]
    fn forced_remove_tolerates_a_missing_directory() {
        let fx = fixture("btrfs");
        fx.manager.create("db", &HashMap::new()).unwrap();
        fs::remove_dir_all(fx.disk_root.path().join("stone_volume/db")).unwrap();

        assert!(matches!(fx.manager.remove("db"), Err(VolumeError::PathMissing(_))));
        fx.manager.remove_with("db", true).unwrap();
        assert!(fx.manager.list().is_empty());
    }

    #[test]
    fn lookups_report_missing_volumes() {
        let fx = fixture("btrfs");
        assert!(matches!(fx.manager.mount("nope"), Err(VolumeError::NotFound(_))));
        assert!(matches!(fx.manager.unmount("nope"), Err(VolumeError::NotFound(_))));
        assert!(matches!(fx.manager.path("nope"), Err(VolumeError::NotFound(_))));
    }
}
