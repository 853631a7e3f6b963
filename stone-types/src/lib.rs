// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the Stone volume service
//!
//! These types are shared by every layer of the stack:
//!
//! - **stone-sys**: produces `DiskInfo` records from the host inventory
//! - **stone-volumes**: places volumes on disks and reports `VolumeSummary` entries
//! - **stone-service**: serializes these types for D-Bus transport

pub mod common;
pub mod disk;
pub mod volume;

pub use common::{bytes_to_pretty, parse_size};
pub use disk::{DiskInfo, MediaType};
pub use volume::VolumeSummary;
