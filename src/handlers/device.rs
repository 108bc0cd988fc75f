// src/handlers/device.rs

//! Block-device argument resolution.

use std::path::{Path, PathBuf};

use crate::errors::{Result, WardenError};
use crate::fs::FileSystem;

/// Resolve a device argument to an existing path.
///
/// - absolute paths are taken as-is but must exist;
/// - bare names are looked up under `/dev`;
/// - `nvme0n11`-style names without a `p` separator retry as `nvme0n1p1`.
pub fn resolve_device(fs: &dyn FileSystem, arg: &str) -> Result<PathBuf> {
    let unknown = || WardenError::UnknownDevice(arg.to_string());

    if arg.starts_with('/') {
        let path = PathBuf::from(arg);
        return if fs.exists(&path) { Ok(path) } else { Err(unknown()) };
    }

    let direct = Path::new("/dev").join(arg);
    if fs.exists(&direct) {
        return Ok(direct);
    }

    nvme_partition_candidates(arg)
        .into_iter()
        .map(|name| Path::new("/dev").join(name))
        .find(|candidate| fs.exists(candidate))
        .ok_or_else(unknown)
}

/// `nvme0n12` -> [`nvme0n1p2`]; `nvme0n123` -> [`nvme0n1p23`, `nvme0n12p3`].
fn nvme_partition_candidates(name: &str) -> Vec<String> {
    let Some(rest) = name.strip_prefix("nvme") else {
        return Vec::new();
    };
    let Some((controller, digits)) = rest.split_once('n') else {
        return Vec::new();
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(controller) || !all_digits(digits) {
        return Vec::new();
    }

    (1..digits.len())
        .map(|split| {
            let (namespace, partition) = digits.split_at(split);
            format!("nvme{controller}n{namespace}p{partition}")
        })
        .collect()
}

/// Mount-point directory name for a device path (`/dev/sdb1` -> `sdb1`).
pub fn device_name(device: &Path) -> String {
    device
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn bare_names_resolve_under_dev() {
        let fs = MockFileSystem::new();
        fs.add_file("/dev/sdb1", "");

        assert_eq!(resolve_device(&fs, "sdb1").unwrap(), PathBuf::from("/dev/sdb1"));
        assert_eq!(resolve_device(&fs, "/dev/sdb1").unwrap(), PathBuf::from("/dev/sdb1"));
    }

    #[test]
    fn nvme_partitions_gain_a_p_separator() {
        let fs = MockFileSystem::new();
        fs.add_file("/dev/nvme0n1p2", "");

        assert_eq!(
            resolve_device(&fs, "nvme0n12").unwrap(),
            PathBuf::from("/dev/nvme0n1p2")
        );
    }

    #[test]
    fn nvme_candidates_try_every_split() {
        assert_eq!(
            nvme_partition_candidates("nvme0n123"),
            vec!["nvme0n1p23", "nvme0n12p3"]
        );
        assert!(nvme_partition_candidates("nvme0n1").is_empty());
        assert!(nvme_partition_candidates("nvme0n1p2").is_empty());
        assert!(nvme_partition_candidates("sdb1").is_empty());
    }

    #[test]
    fn missing_devices_are_reported_by_argument() {
        let fs = MockFileSystem::new();
        let err = resolve_device(&fs, "sdz9").unwrap_err();
        assert_eq!(err.to_string(), "device sdz9 not found");

        assert!(resolve_device(&fs, "/dev/sdz9").is_err());
    }

    #[test]
    fn device_name_is_the_last_component() {
        assert_eq!(device_name(Path::new("/dev/nvme0n1p2")), "nvme0n1p2");
    }
}
