// SPDX-License-Identifier: GPL-3.0-only

//! Mount table lookups
//!
//! Quota backends need the mount point and options of the filesystem that
//! holds a directory. Both are resolved by device id: stat the directory,
//! then find the `/proc/mounts` entry whose mount point has the same device.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::Result;

const PROC_MOUNTS: &str = "/proc/mounts";

/// One line of `/proc/mounts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|option| option == name)
    }

    /// Value of a `key=value` mount option.
    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.options.iter().find_map(|option| {
            let (name, value) = option.split_once('=')?;
            (name == key).then_some(value)
        })
    }

    /// Journaled quota format and group quota file name, with the ext4 defaults.
    pub fn journal_quota(&self) -> (&str, &str) {
        (
            self.option_value("jqfmt").unwrap_or("vfsv0"),
            self.option_value("grpjquota").unwrap_or("aquota.group"),
        )
    }
}

/// Parse `/proc/mounts` content; lines without exactly six fields are skipped.
pub fn parse_proc_mounts(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return None;
            }
            Some(MountEntry {
                device: String::from_utf8_lossy(&unescape_mount_path(fields[0])).to_string(),
                mount_point: PathBuf::from(OsString::from_vec(unescape_mount_path(fields[1]))),
                fs_type: fields[2].to_string(),
                options: fields[3].split(',').map(ToString::to_string).collect(),
            })
        })
        .collect()
}

/// Unescape octal sequences in /proc/mounts paths (e.g. `\040` -> ` `).
/// The kernel leaves non-ASCII bytes unescaped, so decoding works on bytes.
fn unescape_mount_path(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    output
}

/// Resolves directories to the filesystem that holds them
pub trait MountTable: Send + Sync {
    /// Device id (`st_dev`) of the filesystem holding `path`.
    fn device_id(&self, path: &Path) -> Result<u64>;

    /// The mount entry whose mount point lives on device `device_id`.
    fn entry_for_device(&self, device_id: u64) -> Result<Option<MountEntry>>;
}

/// The live mount table of this host
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMounts;

impl MountTable for ProcMounts {
    fn device_id(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).inspect_err(|error| {
            warn!("stat {} failed: {}", path.display(), error);
        })?;
        Ok(metadata.dev())
    }

    fn entry_for_device(&self, device_id: u64) -> Result<Option<MountEntry>> {
        let content = fs::read_to_string(PROC_MOUNTS)?;
        let entry = parse_proc_mounts(&content).into_iter().find(|entry| {
            fs::metadata(&entry.mount_point)
                .map(|metadata| metadata.dev() == device_id)
                .unwrap_or(false)
        });
        Ok(entry)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fixed::FixedMounts;

#[cfg(any(test, feature = "testing"))]
mod fixed {
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;

    use super::{MountEntry, MountTable};
    use crate::Result;

    /// Every existing path lives on one filesystem described by a mutable entry.
    pub struct FixedMounts {
        entry: Mutex<MountEntry>,
    }

    impl FixedMounts {
        pub const DEVICE: u64 = 0x801;

        pub fn new(device: &str, mount_point: &Path, fs_type: &str, options: &[&str]) -> Self {
            Self {
                entry: Mutex::new(MountEntry {
                    device: device.to_string(),
                    mount_point: mount_point.to_path_buf(),
                    fs_type: fs_type.to_string(),
                    options: options.iter().map(|option| option.to_string()).collect(),
                }),
            }
        }

        /// Append a mount option, as a remount would.
        pub fn add_option(&self, option: &str) {
            let mut entry = self.entry.lock().expect("mount entry poisoned");
            if !entry.has_option(option) {
                entry.options.push(option.to_string());
            }
        }

        pub fn entry(&self) -> MountEntry {
            self.entry.lock().expect("mount entry poisoned").clone()
        }
    }

    impl MountTable for FixedMounts {
        fn device_id(&self, path: &Path) -> Result<u64> {
            if !path.exists() {
                return Err(io::Error::new(io::ErrorKind::NotFound, path.display().to_string()).into());
            }
            Ok(Self::DEVICE)
        }

        fn entry_for_device(&self, device_id: u64) -> Result<Option<MountEntry>> {
            Ok((device_id == Self::DEVICE).then(|| self.entry()))
        }
    }
}
