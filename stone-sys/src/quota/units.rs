// SPDX-License-Identifier: GPL-3.0-only

//! Byte <-> quota block conversion. Both quota tools take limits in KiB.

const KIB: u64 = 1024;

/// Zero stays zero ("no limit"); any positive size is at least one block.
pub fn bytes_to_kib(bytes: u64) -> u64 {
    match bytes {
        0 => 0,
        1..KIB => 1,
        _ => bytes / KIB,
    }
}

pub fn kib_to_bytes(kib: u64) -> u64 {
    kib.saturating_mul(KIB)
}
