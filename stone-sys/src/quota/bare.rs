// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use super::QuotaBackend;
use crate::Result;

/// No enforcement. Used for filesystems without a supported quota mechanism
/// and when quotas are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareQuota;

impl QuotaBackend for BareQuota {
    fn name(&self) -> &'static str {
        "bare"
    }

    fn set_quota(&self, _path: &Path, _size: u64) -> Result<()> {
        Ok(())
    }

    fn get_quota(&self, _path: &Path) -> Result<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_everything_and_reports_nothing() {
        let bare = BareQuota;
        let path = Path::new("/nonexistent");
        bare.set_quota(path, 1 << 30).unwrap();
        assert_eq!(bare.get_quota(path).unwrap(), 0);
        bare.remove_quota(path).unwrap();
        assert_eq!(bare.quota_id(path).unwrap(), None);
    }
}
