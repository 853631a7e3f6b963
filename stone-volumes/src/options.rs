// SPDX-License-Identifier: GPL-3.0-only

//! Volume names and create options

use std::collections::HashMap;

use stone_types::{MediaType, parse_size};
use tracing::warn;

use crate::error::{Result, VolumeError};

const VALID_KEYS: [&str; 6] = ["diskId", "fsType", "mediaType", "size", "ioClass", "exclusive"];

/// Names become directory names: `[a-zA-Z0-9][a-zA-Z0-9_.-]+`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|first| first.is_ascii_alphanumeric())
        && name.len() > 1
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(VolumeError::InvalidName(name.to_string()))
    }
}

/// Placement and sizing requirements of a new volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Place on this disk, bypassing selection
    pub disk_id: Option<String>,
    pub fs_type: Option<String>,
    pub media_type: Option<MediaType>,
    /// Quota size in bytes
    pub size: u64,
    pub io_class: i64,
    pub exclusive: bool,
}

impl VolumeOptions {
    pub fn with_size(size: u64) -> Self {
        Self {
            disk_id: None,
            fs_type: None,
            media_type: None,
            size,
            io_class: 0,
            exclusive: false,
        }
    }

    /// Parse driver options; unknown keys are rejected.
    pub fn parse(opts: &HashMap<String, String>, default_size: u64) -> Result<Self> {
        if opts.is_empty() {
            warn!("No options given, using default size {} bytes and any disk", default_size);
        }

        if let Some(key) = opts.keys().find(|key| !VALID_KEYS.contains(&key.as_str())) {
            return Err(VolumeError::invalid_option(key, "unknown option"));
        }

        let text = |key: &str| {
            opts.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let size = match text("size") {
            Some(value) => parse_size(value)
                .map_err(|error| VolumeError::invalid_option("size", error.to_string()))?,
            None => default_size,
        };
        if size == 0 {
            return Err(VolumeError::invalid_option("size", "must be positive"));
        }

        let io_class = match text("ioClass") {
            Some(value) => value.parse::<i64>().map_err(|error| {
                VolumeError::invalid_option("ioClass", format!("{value:?}: {error}"))
            })?,
            None => 0,
        };

        let exclusive = match text("exclusive") {
            Some(value) => parse_bool(value)
                .ok_or_else(|| VolumeError::invalid_option("exclusive", format!("{value:?} is not a boolean")))?,
            None => false,
        };

        let media_type = text("mediaType")
            .map(|value| value.parse::<MediaType>())
            .transpose()
            .map_err(|reason| VolumeError::invalid_option("mediaType", reason))?;

        Ok(Self {
            disk_id: text("diskId").map(str::to_string),
            fs_type: text("fsType").map(str::to_string),
            media_type,
            size,
            io_class,
            exclusive,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn accepts_restricted_names() {
        for name in ["db", "db-1", "A.b_c", "9lives"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
        for name in ["", "a", "-db", ".hidden", "db/../x", "db 1", "vol\u{e9}"] {
            assert!(
                matches!(validate_name(name), Err(VolumeError::InvalidName(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn defaults_apply_without_options() {
        let parsed = VolumeOptions::parse(&HashMap::new(), 1 << 30).unwrap();
        assert_eq!(parsed, VolumeOptions::with_size(1 << 30));
    }

    #[test]
    fn parses_every_option() {
        let parsed = VolumeOptions::parse(
            &opts(&[
                ("diskId", "abc"),
                ("fsType", "ext4"),
                ("mediaType", "ssd"),
                ("size", "5000000000"),
                ("ioClass", "-3"),
                ("exclusive", "true"),
            ]),
            1,
        )
        .unwrap();

        assert_eq!(parsed.disk_id.as_deref(), Some("abc"));
        assert_eq!(parsed.fs_type.as_deref(), Some("ext4"));
        assert_eq!(parsed.media_type, Some(MediaType::Ssd));
        assert_eq!(parsed.size, 5_000_000_000);
        assert_eq!(parsed.io_class, -3);
        assert!(parsed.exclusive);
    }

    #[test]
    fn sizes_accept_suffixes() {
        let parsed = VolumeOptions::parse(&opts(&[("size", "10G")]), 1).unwrap();
        assert_eq!(parsed.size, 10 << 30);
    }

    #[test]
    fn rejects_unknown_and_malformed_options() {
        let cases = [
            ("color", "blue", "color"),
            ("size", "lots", "size"),
            ("size", "0", "size"),
            ("ioClass", "high", "ioClass"),
            ("exclusive", "maybe", "exclusive"),
            ("mediaType", "tape", "mediaType"),
        ];
        for (key, value, expected) in cases {
            match VolumeOptions::parse(&opts(&[(key, value)]), 1) {
                Err(VolumeError::InvalidOption { key, .. }) => assert_eq!(key, expected),
                other => panic!("{key}={value}: unexpected {other:?}"),
            }
        }
    }
}
