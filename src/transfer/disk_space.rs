use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::types::error::S3mirrorError;

/// Staging requires 20% more space than the object size.
const STAGING_HEADROOM: f64 = 1.2;

pub const SPACE_PROBE_PREFIX: &str = "s3mirror-space-test-";

// Conservative free-space estimate for platforms without a filesystem
// statistics call.
#[cfg(not(unix))]
const UNKNOWN_PLATFORM_FREE_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpaceInfo {
    pub required: u64,
    pub available: u64,
}

pub fn required_staging_bytes(object_size: u64) -> u64 {
    (object_size as f64 * STAGING_HEADROOM).ceil() as u64
}

/// Checks that the staging directory has room for an object of the given
/// size plus headroom. The directory itself may not exist yet; the check
/// walks up to the nearest existing ancestor before querying.
pub fn validate_staging_space(staging_dir: &Path, object_size: u64) -> Result<DiskSpaceInfo> {
    let check_path = nearest_existing_dir(staging_dir);
    let available = available_disk_space(&check_path)?;
    let required = required_staging_bytes(object_size);

    debug!(
        staging_dir = %check_path.display(),
        required = required,
        available = available,
        "staging disk space checked."
    );

    if available < required {
        return Err(anyhow!(S3mirrorError::InsufficientDiskSpace {
            need: required,
            have: available,
        }));
    }

    Ok(DiskSpaceInfo {
        required,
        available,
    })
}

fn nearest_existing_dir(path: &Path) -> PathBuf {
    let mut check_path = path;
    loop {
        if check_path.is_dir() {
            return check_path.to_path_buf();
        }

        match check_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => check_path = parent,
            _ => return std::env::temp_dir(),
        }
    }
}

#[cfg(unix)]
fn available_disk_space(path: &Path) -> Result<u64> {
    use anyhow::Context;

    let stat = nix::sys::statvfs::statvfs(path)
        .with_context(|| format!("statvfs failed for {}", path.display()))?;

    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

// Platforms without statvfs get a writeability probe and a conservative
// constant.
#[cfg(not(unix))]
fn available_disk_space(path: &Path) -> Result<u64> {
    use anyhow::Context;

    let probe = tempfile::Builder::new()
        .prefix(SPACE_PROBE_PREFIX)
        .tempfile_in(path)
        .with_context(|| format!("cannot write to {}", path.display()))?;
    drop(probe);

    Ok(UNKNOWN_PLATFORM_FREE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_bytes_include_headroom() {
        init_dummy_tracing_subscriber();

        assert_eq!(required_staging_bytes(100), 120);
        assert_eq!(required_staging_bytes(0), 0);
        assert_eq!(required_staging_bytes(1), 2);
    }

    #[test]
    fn validate_with_existing_dir() {
        init_dummy_tracing_subscriber();

        let staging_dir = tempfile::tempdir().unwrap();
        let info = validate_staging_space(staging_dir.path(), 1024).unwrap();

        assert_eq!(info.required, (1024.0 * STAGING_HEADROOM) as u64);
        assert!(0 < info.available);
    }

    #[test]
    fn validate_with_not_yet_created_dir() {
        init_dummy_tracing_subscriber();

        let staging_dir = tempfile::tempdir().unwrap();
        let nested = staging_dir.path().join("not").join("created").join("yet");

        validate_staging_space(&nested, 1024).unwrap();
    }

    #[test]
    fn validate_rejects_oversized_object() {
        init_dummy_tracing_subscriber();

        let staging_dir = tempfile::tempdir().unwrap();
        // no filesystem can satisfy the u64 maximum with headroom
        let result = validate_staging_space(staging_dir.path(), u64::MAX / 2);

        let error = result.unwrap_err();
        let downcast = error.downcast_ref::<S3mirrorError>().unwrap();
        assert!(matches!(
            downcast,
            S3mirrorError::InsufficientDiskSpace { .. }
        ));
    }

    #[test]
    fn nearest_existing_dir_walks_up() {
        init_dummy_tracing_subscriber();

        let staging_dir = tempfile::tempdir().unwrap();
        let nested = staging_dir.path().join("a").join("b");

        assert_eq!(nearest_existing_dir(&nested), staging_dir.path());
        assert_eq!(
            nearest_existing_dir(staging_dir.path()),
            staging_dir.path()
        );
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
