// SPDX-License-Identifier: GPL-3.0-only

//! Directory quotas
//!
//! A quota caps the bytes stored under one directory subtree. The subtree is
//! bound to a quota id from a reserved range, and the filesystem's group
//! (ext4) or project (XFS) accounting enforces a hard block limit on that id.
//!
//! Backends are chosen by filesystem type through [`QuotaManager`], which also
//! owns the id allocator shared by every backend.

mod bare;
mod ext4;
pub mod ids;
pub mod report;
pub mod units;
mod xfs;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cmd::{CommandRunner, SystemRunner};
use crate::mounts::{MountTable, ProcMounts};
use crate::Result;

pub use bare::BareQuota;
pub use ext4::Ext4Quota;
pub use ids::{DEFAULT_ID_MAX, DEFAULT_ID_MIN, QuotaIdAllocator};
pub use xfs::XfsQuota;

/// Seconds a soft limit may be exceeded; ext4 bootstrap sets it for the mount.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 43200;

/// Byte-size ceiling on a directory subtree
pub trait QuotaBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply a hard limit of `size` bytes to `path`, binding a quota id first
    /// if the directory has none.
    fn set_quota(&self, path: &Path, size: u64) -> Result<()>;

    /// Current hard limit of `path` in bytes.
    fn get_quota(&self, path: &Path) -> Result<u64>;

    /// Lift the limit. The id binding itself is kept.
    fn remove_quota(&self, path: &Path) -> Result<()> {
        self.set_quota(path, 0)
    }

    /// The quota id bound to `path`, if any.
    fn quota_id(&self, _path: &Path) -> Result<Option<u32>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaKind {
    Bare,
    Ext4,
    Xfs,
}

impl QuotaKind {
    pub fn from_fs_type(fs_type: &str) -> Self {
        match fs_type {
            "ext4" | "ext3" => QuotaKind::Ext4,
            "xfs" => QuotaKind::Xfs,
            _ => QuotaKind::Bare,
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuotaKind::Bare => "bare",
            QuotaKind::Ext4 => "ext4",
            QuotaKind::Xfs => "xfs",
        };
        f.write_str(name)
    }
}

/// `[quota]` section of the service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// When false every filesystem gets the bare backend.
    pub enabled: bool,
    pub id_min: u32,
    pub id_max: u32,
    pub grace_period_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            id_min: DEFAULT_ID_MIN,
            id_max: DEFAULT_ID_MAX,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

/// Owns the quota id allocator and one backend instance per kind
pub struct QuotaManager {
    config: QuotaConfig,
    runner: Arc<dyn CommandRunner>,
    mounts: Arc<dyn MountTable>,
    ids: Arc<QuotaIdAllocator>,
    backends: Mutex<HashMap<QuotaKind, Arc<dyn QuotaBackend>>>,
}

impl QuotaManager {
    pub fn new(
        config: QuotaConfig,
        runner: Arc<dyn CommandRunner>,
        mounts: Arc<dyn MountTable>,
    ) -> Self {
        let (min, max) = (config.id_min, config.id_max);
        let report_runner = runner.clone();
        let ids = QuotaIdAllocator::new(min, max, move || {
            let output = report_runner.run("repquota", &["-gan"])?;
            if !output.success {
                warn!("repquota -gan failed, assuming no quota ids in use: {}", output.combined());
            }
            Ok(report::ids_in_range(&output.stdout, min, max))
        });

        Self::with_allocator(config, runner, mounts, Arc::new(ids))
    }

    pub fn with_allocator(
        config: QuotaConfig,
        runner: Arc<dyn CommandRunner>,
        mounts: Arc<dyn MountTable>,
        ids: Arc<QuotaIdAllocator>,
    ) -> Self {
        Self {
            config,
            runner,
            mounts,
            ids,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Manager for this host: real commands, live mount table.
    pub fn system(config: QuotaConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner), Arc::new(ProcMounts))
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    pub fn ids(&self) -> &Arc<QuotaIdAllocator> {
        &self.ids
    }

    pub fn backend(&self, kind: QuotaKind) -> Arc<dyn QuotaBackend> {
        let kind = if self.config.enabled { kind } else { QuotaKind::Bare };

        let mut backends = self.backends.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        backends
            .entry(kind)
            .or_insert_with(|| {
                info!("Initializing {} quota backend", kind);
                match kind {
                    QuotaKind::Bare => Arc::new(BareQuota) as Arc<dyn QuotaBackend>,
                    QuotaKind::Ext4 => Arc::new(Ext4Quota::new(
                        self.runner.clone(),
                        self.mounts.clone(),
                        self.ids.clone(),
                        self.config.grace_period_secs,
                    )),
                    QuotaKind::Xfs => Arc::new(XfsQuota::new(
                        self.runner.clone(),
                        self.mounts.clone(),
                        self.ids.clone(),
                    )),
                }
            })
            .clone()
    }

    pub fn backend_for_fs(&self, fs_type: &str) -> Arc<dyn QuotaBackend> {
        self.backend(QuotaKind::from_fs_type(fs_type))
    }
}

/// Parse the decimal id a binding query printed; `0` and garbage mean unbound.
fn parse_bound_id(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|id| *id != 0)
}
