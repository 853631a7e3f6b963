// SPDX-License-Identifier: GPL-3.0-only

//! ext4 (and ext3) group quotas
//!
//! The quota id is stored in the `system.subtree` attribute of the directory;
//! the kernel charges everything below it to that group id. Before the first
//! limit on a filesystem, the mount gets group quota accounting: `grpquota`
//! option, an empty group quota file, a grace period, and `quotaon`.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::ids::QuotaIdAllocator;
use super::report::{self, ReportFormat};
use super::units::{bytes_to_kib, kib_to_bytes};
use super::{QuotaBackend, parse_bound_id};
use crate::cmd::CommandRunner;
use crate::mounts::{MountEntry, MountTable};
use crate::{Result, SysError};

const SUBTREE_ATTR: &str = "system.subtree";

/// Empty vfsv0 group quota file; byte 4 carries the format version.
const QUOTA_FILE_HEADER: [u8; 32] = [
    0x27, 0x19, 0xc0, 0xd9, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3a, 0x09, 0x00, 0x80, 0x3a, 0x09, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00,
];

pub struct Ext4Quota {
    runner: Arc<dyn CommandRunner>,
    mounts: Arc<dyn MountTable>,
    ids: Arc<QuotaIdAllocator>,
    grace_period_secs: u64,
    /// Mount points with quota enforcement on, keyed by device id
    started: Mutex<HashMap<u64, PathBuf>>,
}

impl Ext4Quota {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mounts: Arc<dyn MountTable>,
        ids: Arc<QuotaIdAllocator>,
        grace_period_secs: u64,
    ) -> Self {
        Self {
            runner,
            mounts,
            ids,
            grace_period_secs,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure group quotas are enforced on the filesystem holding `path`
    /// and return its mount point. Runs at most once per device.
    fn start(&self, path: &Path) -> Result<PathBuf> {
        let device = self.mounts.device_id(path)?;

        let mut started = self.started.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mount_point) = started.get(&device) {
            return Ok(mount_point.clone());
        }

        let mut entry = self.mount_entry(device, path)?;
        let mount_point = entry.mount_point.clone();
        let mount_str = mount_point.to_string_lossy().to_string();

        if !entry.has_option("grpquota") {
            info!("Remounting {} with group quota accounting", mount_str);
            self.runner
                .run_checked("mount", &["-o", "remount,grpquota", &mount_str])?;
            entry = self.mount_entry(device, path)?;
        }

        self.ensure_quota_file(&entry, &mount_str)?;

        let status = self.runner.run("quotaon", &["-pg", &mount_str])?;
        if !status.combined().contains(" is on") {
            self.runner.run_checked("quotaon", &[&mount_str])?;
            info!("Enabled group quotas on {}", mount_str);
        }

        started.insert(device, mount_point.clone());
        Ok(mount_point)
    }

    fn mount_entry(&self, device: u64, path: &Path) -> Result<MountEntry> {
        self.mounts
            .entry_for_device(device)?
            .ok_or_else(|| SysError::MountPointNotFound(path.to_path_buf()))
    }

    /// Create an empty group quota file if the mount has none.
    fn ensure_quota_file(&self, entry: &MountEntry, mount_str: &str) -> Result<()> {
        let (format, file_name) = entry.journal_quota();
        let quota_file = entry.mount_point.join(file_name);
        if quota_file.exists() {
            return Ok(());
        }

        match fs::remove_file(entry.mount_point.join("aquota.user")) {
            Ok(()) => debug!("Removed stale aquota.user on {}", mount_str),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        let mut header = QUOTA_FILE_HEADER;
        if format == "vfsv1" {
            header[4] = 0x01;
        }

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&quota_file)
            .and_then(|mut file| file.write_all(&header))
            .inspect_err(|error| {
                warn!("Failed to write {} ({}): {}", quota_file.display(), format, error);
            })?;

        let grace = self.grace_period_secs.to_string();
        let initialized = self
            .runner
            .run_checked("setquota", &["-g", "-t", &grace, &grace, mount_str])
            .and_then(|_| self.set_limit(0, 0, mount_str));

        if let Err(error) = initialized {
            let _ = fs::remove_file(&quota_file);
            return Err(error);
        }

        info!("Initialized {} on {}", file_name, mount_str);
        Ok(())
    }

    fn set_limit(&self, id: u32, kib: u64, mount_str: &str) -> Result<()> {
        let id = id.to_string();
        let kib = kib.to_string();
        self.runner
            .run_checked("setquota", &["-g", &id, "0", &kib, "0", "0", mount_str])?;
        Ok(())
    }

    fn bound_id(&self, path: &Path) -> Result<Option<u32>> {
        let path_str = path.to_string_lossy();
        let output = self.runner.run(
            "getfattr",
            &["-n", SUBTREE_ATTR, "--only-values", "--absolute-names", &path_str],
        )?;
        if !output.success {
            return Ok(None);
        }
        Ok(parse_bound_id(&output.stdout))
    }

    /// Reuse the id bound to `path`, or allocate and bind a new one.
    fn bind(&self, path: &Path) -> Result<u32> {
        if let Some(id) = self.bound_id(path)? {
            self.ids.mark_used(id)?;
            return Ok(id);
        }

        let id = self.ids.allocate()?;
        let path_str = path.to_string_lossy();
        let id_str = id.to_string();
        if let Err(error) = self
            .runner
            .run_checked("setfattr", &["-n", SUBTREE_ATTR, "-v", &id_str, &path_str])
        {
            self.ids.release(id);
            return Err(error);
        }

        debug!("Bound quota id {} to {}", id, path.display());
        Ok(id)
    }
}

impl QuotaBackend for Ext4Quota {
    fn name(&self) -> &'static str {
        "ext4"
    }

    fn set_quota(&self, path: &Path, size: u64) -> Result<()> {
        let mount_point = self.start(path)?;
        let id = self.bind(path)?;
        let kib = bytes_to_kib(size);

        self.set_limit(id, kib, &mount_point.to_string_lossy())?;
        info!("Set quota of {} to {} KiB (id {})", path.display(), kib, id);
        Ok(())
    }

    fn get_quota(&self, path: &Path) -> Result<u64> {
        let id = self
            .bound_id(path)?
            .ok_or_else(|| SysError::QuotaNotBound(path.to_path_buf()))?;
        let mount_point = self.start(path)?;

        let report = self
            .runner
            .run_checked("repquota", &["-gvn", &mount_point.to_string_lossy()])?;
        let kib = report::hard_limit_for(&report, ReportFormat::Repquota, id)?;
        Ok(kib_to_bytes(kib))
    }

    fn remove_quota(&self, path: &Path) -> Result<()> {
        if self.bound_id(path)?.is_none() {
            debug!("No quota bound to {}, nothing to lift", path.display());
            return Ok(());
        }
        self.set_quota(path, 0)
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
    use crate::quota::ids::{DEFAULT_ID_MAX, DEFAULT_ID_MIN};

    struct Fixture {
        root: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        mounts: Arc<FixedMounts>,
        quota: Ext4Quota,
    }

    fn fixture(options: &[&str]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.emulate_subtree_attrs(SUBTREE_ATTR);
        let mounts = Arc::new(FixedMounts::new("/dev/sdb1", root.path(), "ext4", options));
        let ids = Arc::new(QuotaIdAllocator::empty(DEFAULT_ID_MIN, DEFAULT_ID_MAX));
        let quota = Ext4Quota::new(runner.clone(), mounts.clone(), ids, 43200);
        Fixture {
            root,
            runner,
            mounts,
            quota,
        }
    }

    impl Fixture {
        fn volume(&self, name: &str) -> PathBuf {
            let path = self.root.path().join(name);
            fs::create_dir_all(&path).unwrap();
            path
        }

        fn mount_str(&self) -> String {
            self.root.path().to_string_lossy().to_string()
        }
    }

    #[test]
    fn first_limit_bootstraps_the_mount() {
        let fx = fixture(&["rw", "grpquota"]);
        fs::write(fx.root.path().join("aquota.user"), b"stale").unwrap();
        let volume = fx.volume("v1");

        fx.quota.set_quota(&volume, 5_000_000_000).unwrap();

        let header = fs::read(fx.root.path().join("aquota.group")).unwrap();
        assert_eq!(header, QUOTA_FILE_HEADER);
        assert!(!fx.root.path().join("aquota.user").exists());

        let mp = fx.mount_str();
        let calls = fx.runner.calls();
        assert!(fx.runner.calls_to("mount").is_empty());
        assert!(calls.contains(&format!("setquota -g -t 43200 43200 {mp}")));
        assert!(calls.contains(&format!("setquota -g 0 0 0 0 0 {mp}")));
        assert!(calls.contains(&format!("quotaon {mp}")));
        assert!(calls.contains(&format!(
            "setfattr -n system.subtree -v {DEFAULT_ID_MIN} {}",
            volume.display()
        )));
        assert_eq!(
            calls.last().unwrap(),
            &format!("setquota -g {DEFAULT_ID_MIN} 0 4882812 0 0 {mp}")
        );
    }

    #[test]
    fn remounts_when_group_quota_is_off() {
        let fx = fixture(&["rw", "jqfmt=vfsv1"]);
        let mounts = fx.mounts.clone();
        fx.runner.on_call(move |program, args| {
            (program == "mount").then(|| {
                assert_eq!(args[..2], ["-o", "remount,grpquota"]);
                mounts.add_option("grpquota");
                CommandOutput::success("")
            })
        });
        let volume = fx.volume("v1");

        fx.quota.set_quota(&volume, 1 << 20).unwrap();

        assert_eq!(fx.runner.calls_to("mount").len(), 1);
        assert!(fx.mounts.entry().has_option("grpquota"));
        let header = fs::read(fx.root.path().join("aquota.group")).unwrap();
        assert_eq!(header[4], 0x01);
    }

    #[test]
    fn bootstrap_runs_once_per_device() {
        let fx = fixture(&["grpquota"]);
        let mp = fx.mount_str();
        fx.runner.on(
            "quotaon",
            &["-pg"],
            CommandOutput::success(format!("group quota on {mp} (/dev/sdb1) is on\n")),
        );

        for name in ["a", "b", "c"] {
            let volume = fx.volume(name);
            fx.quota.set_quota(&volume, 4096).unwrap();
        }

        assert_eq!(fx.runner.calls_to("quotaon").len(), 1);
        let ids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| fx.quota.quota_id(&fx.root.path().join(name)).unwrap().unwrap())
            .collect();
        assert_eq!(ids, vec![DEFAULT_ID_MIN, DEFAULT_ID_MIN + 1, DEFAULT_ID_MIN + 2]);
    }

    #[test]
    fn existing_quota_file_is_left_alone() {
        let fx = fixture(&["grpquota", "grpjquota=quota.grp"]);
        fs::write(fx.root.path().join("quota.grp"), b"existing").unwrap();
        let volume = fx.volume("v1");

        fx.quota.set_quota(&volume, 4096).unwrap();

        assert_eq!(fs::read(fx.root.path().join("quota.grp")).unwrap(), b"existing");
        assert!(!fx.runner.calls().iter().any(|call| call.contains("-t 43200")));
    }

    #[test]
    fn failed_initialization_removes_the_quota_file() {
        let fx = fixture(&["grpquota"]);
        fx.runner.on("setquota", &["-g", "-t"], CommandOutput::failure("setquota: not supported"));
        let volume = fx.volume("v1");

        let error = fx.quota.set_quota(&volume, 4096).unwrap_err();
        assert!(matches!(error, SysError::CommandFailed { .. }));
        assert!(!fx.root.path().join("aquota.group").exists());
    }

    #[test]
    fn sub_kilobyte_limits_round_up() {
        let fx = fixture(&["grpquota"]);
        let volume = fx.volume("tiny");

        fx.quota.set_quota(&volume, 500).unwrap();

        let last = fx.runner.calls().pop().unwrap();
        assert_eq!(last, format!("setquota -g {DEFAULT_ID_MIN} 0 1 0 0 {}", fx.mount_str()));
    }

    #[test]
    fn reads_back_the_hard_limit_in_bytes() {
        let fx = fixture(&["grpquota"]);
        fx.runner.on(
            "repquota",
            &["-gvn"],
            CommandOutput::success(format!(
                "Group used soft hard\n#0 -- 10 0 0 1 0 0\n#{DEFAULT_ID_MIN} -- 4 0 4882812 1 0 0\n"
            )),
        );
        let volume = fx.volume("v1");

        fx.quota.set_quota(&volume, 5_000_000_000).unwrap();
        assert_eq!(fx.quota.get_quota(&volume).unwrap(), 4_882_812 * 1024);
    }

    #[test]
    fn unbound_paths_have_no_quota() {
        let fx = fixture(&["grpquota"]);
        let volume = fx.volume("v1");

        assert!(matches!(fx.quota.get_quota(&volume), Err(SysError::QuotaNotBound(_))));
        assert_eq!(fx.quota.quota_id(&volume).unwrap(), None);
        fx.quota.remove_quota(&volume).unwrap();
        assert!(fx.runner.calls_to("setquota").is_empty());
    }

    #[test]
    fn remove_zeroes_the_limit_but_keeps_the_binding() {
        let fx = fixture(&["grpquota"]);
        let volume = fx.volume("v1");
        fx.quota.set_quota(&volume, 1 << 30).unwrap();

        fx.quota.remove_quota(&volume).unwrap();

        assert_eq!(fx.quota.quota_id(&volume).unwrap(), Some(DEFAULT_ID_MIN));
        let last = fx.runner.calls().pop().unwrap();
        assert_eq!(last, format!("setquota -g {DEFAULT_ID_MIN} 0 0 0 0 {}", fx.mount_str()));
    }

    #[test]
    fn missing_directory_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let quota = Ext4Quota::new(
            runner,
            Arc::new(crate::mounts::ProcMounts),
            Arc::new(QuotaIdAllocator::empty(1, 10)),
            43200,
        );
        let missing = root.path().join("gone");

        assert!(matches!(quota.set_quota(&missing, 4096), Err(SysError::Io(_))));
    }
}
