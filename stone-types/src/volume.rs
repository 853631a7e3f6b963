// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Name and served path of one volume, as reported by Get and List
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: String,
}
