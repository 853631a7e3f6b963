// SPDX-License-Identifier: GPL-3.0-only

//! XFS project quotas
//!
//! Project accounting can only be switched on at mount time, so a mount
//! without `prjquota` is unsupported rather than remounted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::ids::QuotaIdAllocator;
use super::report::{self, ReportFormat};
use super::units::{bytes_to_kib, kib_to_bytes};
use super::{QuotaBackend, parse_bound_id};
use crate::cmd::CommandRunner;
use crate::mounts::MountTable;
use crate::{Result, SysError};

const PROJECT_QUOTA_OPTIONS: [&str; 3] = ["prjquota", "pquota", "pqnoenforce"];

pub struct XfsQuota {
    runner: Arc<dyn CommandRunner>,
    mounts: Arc<dyn MountTable>,
    ids: Arc<QuotaIdAllocator>,
}

impl XfsQuota {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mounts: Arc<dyn MountTable>,
        ids: Arc<QuotaIdAllocator>,
    ) -> Self {
        Self {
            runner,
            mounts,
            ids,
        }
    }

    fn mount_point(&self, path: &Path) -> Result<PathBuf> {
        let device = self.mounts.device_id(path)?;
        let entry = self
            .mounts
            .entry_for_device(device)?
            .ok_or_else(|| SysError::MountPointNotFound(path.to_path_buf()))?;

        if !PROJECT_QUOTA_OPTIONS.iter().any(|option| entry.has_option(option)) {
            return Err(SysError::Unsupported(format!(
                "{} is not mounted with prjquota",
                entry.mount_point.display()
            )));
        }
        Ok(entry.mount_point)
    }

    fn xfs_quota(&self, command: &str, mount_point: &Path) -> Result<String> {
        self.runner
            .run_checked("xfs_quota", &["-x", "-c", command, &mount_point.to_string_lossy()])
    }

    fn bound_id(&self, path: &Path) -> Result<Option<u32>> {
        let output = self
            .runner
            .run("xfs_io", &["-r", "-c", "lsproj", &path.to_string_lossy()])?;
        if !output.success {
            return Ok(None);
        }

        // "projid = 20971521"
        Ok(output
            .stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("projid")?.trim().strip_prefix('='))
            .and_then(parse_bound_id))
    }

    fn bind(&self, path: &Path, mount_point: &Path) -> Result<u32> {
        if let Some(id) = self.bound_id(path)? {
            self.ids.mark_used(id)?;
            return Ok(id);
        }

        // xfs_quota splits its -c command on whitespace
        let path_str = path.to_string_lossy();
        if path_str.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
            return Err(SysError::Unsupported(format!(
                "xfs_quota cannot address {:?}: whitespace or quotes in path",
                path_str
            )));
        }

        let id = self.ids.allocate()?;
        let command = format!("project -s -p {} {}", path_str, id);
        if let Err(error) = self.xfs_quota(&command, mount_point) {
            self.ids.release(id);
            return Err(error);
        }

        debug!("Bound project id {} to {}", id, path.display());
        Ok(id)
    }
}

impl QuotaBackend for XfsQuota {
    fn name(&self) -> &'static str {
        "xfs"
    }

    fn set_quota(&self, path: &Path, size: u64) -> Result<()> {
        let mount_point = self.mount_point(path)?;
        let id = self.bind(path, &mount_point)?;
        let kib = bytes_to_kib(size);

        self.xfs_quota(&format!("limit -p bhard={}k {}", kib, id), &mount_point)?;
        info!("Set project quota of {} to {} KiB (id {})", path.display(), kib, id);
        Ok(())
    }

    fn get_quota(&self, path: &Path) -> Result<u64> {
        let id = self
            .bound_id(path)?
            .ok_or_else(|| SysError::QuotaNotBound(path.to_path_buf()))?;
        let mount_point = self.mount_point(path)?;

        let report = self.xfs_quota("report -p -n -N -b", &mount_point)?;
        let kib = report::hard_limit_for(&report, ReportFormat::XfsQuota, id)?;
        Ok(kib_to_bytes(kib))
    }

    fn remove_quota(&self, path: &Path) -> Result<()> {
        let Some(id) = self.bound_id(path)? else {
            return Ok(());
        };
        let mount_point = self.mount_point(path)?;
        self.xfs_quota(&format!("limit -p bhard=0 {}", id), &mount_point)?;
        Ok(())
    }

    fn quota_id(&self, path: &Path) -> Result<Option<u32>> {
        self.bound_id(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{CommandOutput, ScriptedRunner};
    use crate::mounts::FixedMounts;

    fn backend(options: &[&str]) -> (tempfile::TempDir, Arc<ScriptedRunner>, XfsQuota) {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mounts = Arc::new(FixedMounts::new("/dev/nvme0n1p1", root.path(), "xfs", options));
        let ids = Arc::new(QuotaIdAllocator::empty(100, 200));
        let quota = XfsQuota::new(runner.clone(), mounts, ids);
        (root, runner, quota)
    }

    #[test]
    fn binds_a_project_and_sets_the_block_limit() {
        let (root, runner, quota) = backend(&["rw", "prjquota"]);
        let volume = root.path().join("v1");
        std::fs::create_dir(&volume).unwrap();

        quota.set_quota(&volume, 1 << 30).unwrap();

        let mp = root.path().display().to_string();
        assert_eq!(
            runner.calls_to("xfs_quota"),
            vec![
                format!("xfs_quota -x -c project -s -p {} 100 {mp}", volume.display()),
                format!("xfs_quota -x -c limit -p bhard=1048576k 100 {mp}"),
            ]
        );
    }

    #[test]
    fn reuses_an_existing_project_id() {
        let (root, runner, quota) = backend(&["pquota"]);
        runner.on("xfs_io", &["-r", "-c", "lsproj"], CommandOutput::success("projid = 150\n"));
        runner.on(
            "xfs_quota",
            &["-x", "-c", "report -p -n -N -b"],
            CommandOutput::success("#0 0 0 0 00 [--------]\n#150 12 0 2048 00 [--------]\n"),
        );

        quota.set_quota(root.path(), 2 << 20).unwrap();
        assert_eq!(quota.quota_id(root.path()).unwrap(), Some(150));
        assert_eq!(quota.get_quota(root.path()).unwrap(), 2048 * 1024);
        assert!(!runner.calls().iter().any(|call| call.contains("project -s")));
    }

    #[test]
    fn mounts_without_project_quota_are_unsupported() {
        let (root, _runner, quota) = backend(&["rw", "noatime"]);
        assert!(matches!(
            quota.set_quota(root.path(), 4096),
            Err(SysError::Unsupported(_))
        ));
    }

    #[test]
    fn paths_with_whitespace_are_not_bound() {
        let (root, runner, quota) = backend(&["prjquota"]);
        let volume = root.path().join("my volume");
        std::fs::create_dir(&volume).unwrap();

        assert!(matches!(
            quota.set_quota(&volume, 4096),
            Err(SysError::Unsupported(_))
        ));
        assert!(runner.calls_to("xfs_quota").is_empty());
        assert!(!quota.ids.is_used(100));
    }

    #[test]
    fn unbound_paths_report_no_quota() {
        let (root, runner, quota) = backend(&["prjquota"]);
        runner.on("xfs_io", &[], CommandOutput::success("projid = 0\n"));

        assert!(matches!(quota.get_quota(root.path()), Err(SysError::QuotaNotBound(_))));
        quota.remove_quota(root.path()).unwrap();
        assert!(runner.calls_to("xfs_quota").is_empty());
    }
}
