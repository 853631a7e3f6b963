// SPDX-License-Identifier: GPL-3.0-only

//! Host-level operations for the Stone volume service
//!
//! This crate holds everything that touches the machine directly:
//! - Running external tools (`CommandRunner`)
//! - Resolving mount points and mount options from `/proc/mounts`
//! - Enumerating usable disks (`df` + `/sys/block`)
//! - Enforcing directory quotas with ext4 group quotas or XFS project quotas
//!
//! Quota operations require root and should only be driven from the
//! privileged service (stone-service) or the `stone-disks` tool.

pub mod cmd;
pub mod error;
pub mod inventory;
pub mod mounts;
pub mod quota;

pub use cmd::{CommandOutput, CommandRunner, SystemRunner};
pub use error::{Result, SysError};
pub use inventory::{DiskInventory, StaticInventory, SystemInventory};
pub use mounts::{MountEntry, MountTable, ProcMounts};
pub use quota::{QuotaBackend, QuotaConfig, QuotaIdAllocator, QuotaKind, QuotaManager};

#[cfg(any(test, feature = "testing"))]
pub use cmd::ScriptedRunner;
#[cfg(any(test, feature = "testing"))]
pub use mounts::FixedMounts;
