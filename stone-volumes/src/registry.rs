// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::selector::Placement;
use crate::volume::Volume;

pub type VolumeMap = BTreeMap<String, Arc<Volume>>;

/// Name -> volume map behind one coarse lock.
///
/// Create and remove hold [`Registry::lock`] for their whole sequence;
/// lookups hold it only long enough to clone an `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    volumes: Mutex<VolumeMap>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, VolumeMap> {
        self.volumes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Volume>> {
        self.lock().get(name).cloned()
    }

    /// Volumes in name order.
    pub fn snapshot(&self) -> Vec<Arc<Volume>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Load every placed volume contributes, for disk selection.
pub fn placements(volumes: &VolumeMap) -> Vec<Placement> {
    volumes.values().map(|volume| volume.placement()).collect()
}
