// SPDX-License-Identifier: GPL-3.0-only

//! Disk selection
//!
//! Candidates are filtered by filesystem type, media type, exclusivity and
//! remaining capacity, then ranked twice: by remaining capacity and by the IO
//! class already placed on them (doubled on rotational disks). The lowest sum
//! of rank positions wins; a disk with no IO load pays nothing for its IO rank.
//!
//! Disks are ordered by id first and all sorts are stable, so ties go to the
//! lowest disk id.

use stone_types::DiskInfo;
use tracing::debug;

use crate::error::{Result, VolumeError};
use crate::options::VolumeOptions;

/// What a placed volume contributes to its disk's load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub disk_id: String,
    pub size: u64,
    pub io_class: i64,
    pub exclusive: bool,
}

#[derive(Debug)]
struct Candidate {
    disk: DiskInfo,
    remaining: u64,
    io_score: i64,
}

/// Remaining capacity and summed IO class of `disk`, or `None` when an
/// exclusive request or an exclusive volume rules the disk out.
fn load_on(disk: &DiskInfo, request: &VolumeOptions, placed: &[Placement]) -> Option<(u64, i64)> {
    let mut used: u64 = 0;
    let mut io_class: i64 = 0;
    for volume in placed.iter().filter(|volume| volume.disk_id == disk.id) {
        if request.exclusive || volume.exclusive {
            return None;
        }
        used = used.saturating_add(volume.size);
        io_class = io_class.saturating_add(volume.io_class);
    }
    Some((disk.size.saturating_sub(used), io_class))
}

/// Pick a disk for a new volume.
///
/// A requested `disk_id` skips the type filters and scoring, but the disk
/// still has to be free of exclusive volumes and have room for the request.
pub fn choose_disk(
    request: &VolumeOptions,
    mut disks: Vec<DiskInfo>,
    placed: &[Placement],
) -> Result<DiskInfo> {
    if let Some(disk_id) = &request.disk_id {
        let disk = disks
            .into_iter()
            .find(|disk| &disk.id == disk_id)
            .ok_or_else(|| VolumeError::DiskNotFound(disk_id.clone()))?;
        return match load_on(&disk, request, placed) {
            Some((remaining, _)) if remaining >= request.size => Ok(disk),
            Some((remaining, _)) => Err(VolumeError::NoSuitableDisk(format!(
                "disk {} has {} bytes left, {} requested",
                disk.id, remaining, request.size
            ))),
            None => Err(VolumeError::NoSuitableDisk(format!(
                "disk {} cannot be shared (exclusive {})",
                disk.id, request.exclusive
            ))),
        };
    }

    disks.sort_by(|a, b| a.id.cmp(&b.id));

    let mut candidates = Vec::new();
    for disk in disks {
        if request.fs_type.as_ref().is_some_and(|fs_type| *fs_type != disk.fs_type) {
            continue;
        }
        if request.media_type.is_some_and(|media| media != disk.media_type) {
            continue;
        }

        let Some((remaining, io_class)) = load_on(&disk, request, placed) else {
            continue;
        };
        if remaining < request.size {
            continue;
        }

        let io_score = if disk.media_type.is_rotational() {
            io_class.saturating_mul(2)
        } else {
            io_class
        };
        candidates.push(Candidate {
            disk,
            remaining,
            io_score,
        });
    }

    let mut size_rank: Vec<usize> = (0..candidates.len()).collect();
    size_rank.sort_by_key(|&index| candidates[index].remaining);
    let mut io_rank: Vec<usize> = (0..candidates.len()).collect();
    io_rank.sort_by_key(|&index| candidates[index].io_score);

    let position = |rank: &[usize], index: usize| rank.iter().position(|&i| i == index).unwrap_or(0);

    let best = (0..candidates.len()).min_by_key(|&index| {
        let mut score = position(size_rank.as_slice(), index);
        if candidates[index].io_score != 0 {
            score += position(io_rank.as_slice(), index);
        }
        debug!("Disk {} scored {}", candidates[index].disk.id, score);
        // min_by_key keeps the first minimum
        score
    });

    match best {
        Some(index) => Ok(candidates.swap_remove(index).disk),
        None => Err(VolumeError::NoSuitableDisk(format!(
            "no disk fits {} bytes (fsType {}, mediaType {}, exclusive {})",
            request.size,
            request.fs_type.as_deref().unwrap_or("any"),
            request
                .media_type
                .map(|media| media.to_string())
                .unwrap_or_else(|| "any".to_string()),
            request.exclusive
        ))),
    }
}
