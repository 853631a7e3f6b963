// SPDX-License-Identifier: GPL-3.0-only

//! Disk inventory
//!
//! Usable disks are the mounted block-device filesystems reported by `df`,
//! classified by the rotational flag of their block device in sysfs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stone_types::{DiskInfo, MediaType};
use tracing::{debug, warn};

use crate::cmd::CommandRunner;
use crate::{Result, SysError};

const SYS_BLOCK: &str = "/sys/block";

/// Source of the current disk list; queried fresh for every placement
pub trait DiskInventory: Send + Sync {
    fn disks(&self) -> Result<Vec<DiskInfo>>;
}

/// A fixed disk list
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    disks: Vec<DiskInfo>,
}

impl StaticInventory {
    pub fn new(disks: Vec<DiskInfo>) -> Self {
        Self { disks }
    }
}

impl DiskInventory for StaticInventory {
    fn disks(&self) -> Result<Vec<DiskInfo>> {
        Ok(self.disks.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DfRow {
    filesystem: String,
    fs_type: String,
    size: u64,
    used: u64,
    used_percent: u8,
    mount_point: String,
}

/// Parse `df -T -B1 -P` output, skipping the header and malformed rows.
fn parse_df(output: &str) -> Vec<DfRow> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() != 7 {
                return None;
            }

            let row = (|| {
                Some(DfRow {
                    filesystem: cols[0].to_string(),
                    fs_type: cols[1].to_string(),
                    size: cols[2].parse().ok()?,
                    used: cols[3].parse().ok()?,
                    used_percent: cols[5].trim_end_matches('%').parse().ok()?,
                    mount_point: cols[6].to_string(),
                })
            })();

            if row.is_none() {
                warn!("Skipping malformed df row: {}", line);
            }
            row
        })
        .collect()
}

/// `/dev/rbd0`, `/dev/rbd1`, ... are network block devices, never placement targets.
fn is_rbd_device(filesystem: &str) -> bool {
    filesystem
        .strip_prefix("/dev/rbd")
        .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
}

/// Disks of this host, from `df` and sysfs
pub struct SystemInventory {
    runner: Arc<dyn CommandRunner>,
    sys_block: PathBuf,
}

impl SystemInventory {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            sys_block: PathBuf::from(SYS_BLOCK),
        }
    }

    /// Read block device classification from another sysfs root.
    pub fn with_sys_block(mut self, sys_block: impl Into<PathBuf>) -> Self {
        self.sys_block = sys_block.into();
        self
    }

    /// Media type of every block device, keyed by kernel name (e.g. "sda").
    fn block_devices(&self) -> Result<BTreeMap<String, MediaType>> {
        let mut devices = BTreeMap::new();
        for entry in fs::read_dir(&self.sys_block)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let flag = fs::read_to_string(entry.path().join("queue/rotational"))?;

            let media = if name.starts_with("nvme") {
                MediaType::Nvme
            } else {
                MediaType::from_rotational_flag(&flag)
            };
            devices.insert(name, media);
        }
        Ok(devices)
    }
}

/// Longest block device name that prefixes the partition name wins (sda vs sdaa).
fn media_for_device(filesystem: &str, devices: &BTreeMap<String, MediaType>) -> MediaType {
    let Some(name) = filesystem.strip_prefix("/dev/") else {
        return MediaType::Unknown;
    };

    devices
        .iter()
        .filter(|(block, _)| name.starts_with(block.as_str()))
        .max_by_key(|(block, _)| block.len())
        .map(|(_, media)| *media)
        .unwrap_or(MediaType::Unknown)
}

fn is_skipped_mount(mount_point: &str, working_mount: Option<&Path>) -> bool {
    mount_point == "/" || working_mount.is_some_and(|cwd| cwd == Path::new(mount_point))
}

impl DiskInventory for SystemInventory {
    fn disks(&self) -> Result<Vec<DiskInfo>> {
        let devices = self.block_devices()?;

        let output = self.runner.run("df", &["-T", "-B1", "-P"])?;
        if output.stdout.trim().is_empty() {
            return Err(SysError::Inventory(format!(
                "df produced no output: {}",
                output.combined()
            )));
        }

        let rows = parse_df(&output.stdout);
        if rows.is_empty() {
            return Err(SysError::Inventory("df produced no usable rows".to_string()));
        }

        let working_dir = std::env::current_dir().ok();
        let mut disks = Vec::new();
        for row in rows {
            if is_skipped_mount(&row.mount_point, working_dir.as_deref()) || is_rbd_device(&row.filesystem) {
                continue;
            }

            let media = media_for_device(&row.filesystem, &devices);
            if media == MediaType::Unknown {
                if row.filesystem.starts_with("/dev/") {
                    warn!("Unknown disk type found for device: {}", row.filesystem);
                }
                continue;
            }

            disks.push(DiskInfo::new(
                row.filesystem,
                row.fs_type,
                media,
                row.mount_point,
                row.size,
                row.used,
                row.used_percent,
            ));
        }

        debug!("Collected {} disks", disks.len());
        Ok(disks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{CommandOutput, ScriptedRunner};

    const DF: &str = "\
Filesystem     Type      1-blocks        Used    Available Capacity Mounted on
/dev/sda2      ext4   52710469632  5577371648  44431966208      12% /
devtmpfs       devtmpfs 135084355584          0 135084355584       0% /dev
/dev/sdb1      ext4  211243687936 53687091200 146782019584      27% /data1
/dev/nvme0n1p1 xfs   960197124096  1073741824 959123382272       1% /data2
/dev/rbd0      ext4   10737418240           0  10737418240       0% /mnt/rbd
/dev/sdc1      ext4       garbage           0            0       0% /data3
";

    fn sysfs() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for (name, flag) in [("sda", "0\n"), ("sdb", "1\n"), ("nvme0n1", "0\n"), ("rbd0", "0\n")] {
            let queue = root.path().join(name).join("queue");
            fs::create_dir_all(&queue).unwrap();
            fs::write(queue.join("rotational"), flag).unwrap();
        }
        root
    }

    #[test]
    fn parses_df_rows_and_skips_malformed_ones() {
        let rows = parse_df(DF);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[2].filesystem, "/dev/sdb1");
        assert_eq!(rows[2].size, 211243687936);
        assert_eq!(rows[2].used_percent, 27);
    }

    #[test]
    fn classifies_partitions_by_longest_block_prefix() {
        let mut devices = BTreeMap::new();
        devices.insert("sda".to_string(), MediaType::Ssd);
        devices.insert("sdaa".to_string(), MediaType::Hdd);

        assert_eq!(media_for_device("/dev/sdaa1", &devices), MediaType::Hdd);
        assert_eq!(media_for_device("/dev/sda3", &devices), MediaType::Ssd);
        assert_eq!(media_for_device("tmpfs", &devices), MediaType::Unknown);
    }

    #[test]
    fn collects_usable_disks() {
        let root = sysfs();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("df", &[], CommandOutput::success(DF));

        let inventory = SystemInventory::new(runner).with_sys_block(root.path());
        let disks = inventory.disks().unwrap();

        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].device, "/dev/sdb1");
        assert_eq!(disks[0].media_type, MediaType::Hdd);
        assert_eq!(disks[0].mount_point, PathBuf::from("/data1"));
        assert_eq!(disks[1].media_type, MediaType::Nvme);
        assert_eq!(disks[1].fs_type, "xfs");
        assert_eq!(
            disks[0].id,
            DiskInfo::derive_id("/dev/sdb1", "ext4", MediaType::Hdd)
        );
    }

    #[test]
    fn empty_df_output_is_an_error() {
        let root = sysfs();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("df", &[], CommandOutput::failure("df: cannot read table of mounted file systems"));

        let inventory = SystemInventory::new(runner).with_sys_block(root.path());
        assert!(matches!(inventory.disks(), Err(SysError::Inventory(_))));
    }

    #[test]
    fn detects_rbd_devices() {
        assert!(is_rbd_device("/dev/rbd12"));
        assert!(!is_rbd_device("/dev/rbd"));
        assert!(!is_rbd_device("/dev/rbdx1"));
        assert!(!is_rbd_device("/dev/sda1"));
    }
}
