// SPDX-License-Identifier: GPL-3.0-only

//! Disk models
//!
//! A `DiskInfo` is an immutable snapshot of one usable, mounted disk. The
//! inventory produces a fresh list on every query; records are compared by id.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse media classification used to weight IO contention during placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "nvme")]
    Nvme,
    #[serde(rename = "unknown")]
    Unknown,
}

impl MediaType {
    /// Map the content of `/sys/block/<dev>/queue/rotational`.
    pub fn from_rotational_flag(flag: &str) -> Self {
        match flag.trim() {
            "0" => MediaType::Ssd,
            "1" => MediaType::Hdd,
            _ => MediaType::Unknown,
        }
    }

    /// Spinning media pays double for IO contention.
    pub fn is_rotational(self) -> bool {
        matches!(self, MediaType::Hdd)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Ssd => "SSD",
            MediaType::Hdd => "HDD",
            MediaType::Nvme => "nvme",
            MediaType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ssd" => Ok(MediaType::Ssd),
            "hdd" => Ok(MediaType::Hdd),
            "nvme" => Ok(MediaType::Nvme),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// Snapshot of one usable disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Stable identifier derived from device, filesystem type and media type
    pub id: String,

    /// Device path (e.g., "/dev/sdb1")
    pub device: String,

    /// Filesystem type (e.g., "ext4", "xfs")
    pub fs_type: String,

    pub media_type: MediaType,

    /// Where the filesystem is mounted; volumes live under `<mount_point>/stone_volume`
    pub mount_point: PathBuf,

    /// Total size in bytes
    pub size: u64,

    /// Used bytes as reported by the filesystem
    pub used: u64,

    /// Usage percentage (0-100)
    pub used_percent: u8,
}

impl DiskInfo {
    pub fn new(
        device: impl Into<String>,
        fs_type: impl Into<String>,
        media_type: MediaType,
        mount_point: impl Into<PathBuf>,
        size: u64,
        used: u64,
        used_percent: u8,
    ) -> Self {
        let device = device.into();
        let fs_type = fs_type.into();
        Self {
            id: Self::derive_id(&device, &fs_type, media_type),
            device,
            fs_type,
            media_type,
            mount_point: mount_point.into(),
            size,
            used,
            used_percent,
        }
    }

    /// Name-based UUID of `<device>_<fs_type>_<media>`, identical across restarts.
    pub fn derive_id(device: &str, fs_type: &str, media_type: MediaType) -> String {
        let key = format!("{device}_{fs_type}_{media_type}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
            .simple()
            .to_string()
    }

    pub fn available(&self) -> u64 {
        self.size.saturating_sub(self.used)
    }
}

impl PartialEq for DiskInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DiskInfo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_id_is_stable_and_content_derived() {
        let first = DiskInfo::new("/dev/sdb1", "ext4", MediaType::Hdd, "/data1", 100, 0, 0);
        let second = DiskInfo::new("/dev/sdb1", "ext4", MediaType::Hdd, "/mnt/other", 500, 7, 1);
        let other = DiskInfo::new("/dev/sdb1", "xfs", MediaType::Hdd, "/data1", 100, 0, 0);

        assert_eq!(first.id, second.id);
        assert_eq!(first, second);
        assert_ne!(first.id, other.id);
        assert_eq!(first.id.len(), 32);
    }

    #[test]
    fn media_type_parses_request_values() {
        assert_eq!("ssd".parse::<MediaType>().unwrap(), MediaType::Ssd);
        assert_eq!("HDD".parse::<MediaType>().unwrap(), MediaType::Hdd);
        assert_eq!("NVMe".parse::<MediaType>().unwrap(), MediaType::Nvme);
        assert!("tape".parse::<MediaType>().is_err());
    }

    #[test]
    fn media_type_serializes_with_inventory_names() {
        assert_eq!(serde_json::to_string(&MediaType::Ssd).unwrap(), "\"SSD\"");
        assert_eq!(serde_json::to_string(&MediaType::Nvme).unwrap(), "\"nvme\"");
        assert_eq!(MediaType::from_rotational_flag("1\n"), MediaType::Hdd);
        assert!(MediaType::Hdd.is_rotational());
        assert!(!MediaType::Nvme.is_rotational());
    }

    #[test]
    fn test_disk_info_serialization() {
        let disk = DiskInfo::new("/dev/nvme0n1p1", "xfs", MediaType::Nvme, "/data2", 1 << 40, 1 << 30, 1);

        let json = serde_json::to_string(&disk).unwrap();
        let deserialized: DiskInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(disk, deserialized);
        assert_eq!(deserialized.mount_point, PathBuf::from("/data2"));
        assert_eq!(deserialized.available(), (1 << 40) - (1 << 30));
    }
}
