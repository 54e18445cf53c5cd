use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use filetime::{FileTime, set_file_mtime};

/// Keys that escape the destination root are rejected before any write.
pub fn check_directory_traversal(key: &str) -> bool {
    key.split(['/', '\\']).any(|component| component == "..")
}

pub fn key_to_file_path(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in key.split('/') {
        path.push(component);
    }

    path
}

pub fn file_path_to_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;

    let components: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();

    Some(components.join("/"))
}

pub async fn create_directory_hierarchy(path: &Path) -> Result<()> {
    let Some(directory) = path.parent() else {
        return Ok(());
    };

    if !directory.as_os_str().is_empty() && !directory.is_dir() {
        tokio::fs::create_dir_all(directory)
            .await
            .context("tokio::fs::create_dir_all() failed.")?;
    }

    Ok(())
}

pub fn set_last_modified(path: &Path, last_modified: DateTime<Utc>) -> std::io::Result<()> {
    set_file_mtime(
        path,
        FileTime::from_unix_time(
            last_modified.timestamp(),
            last_modified.timestamp_subsec_nanos(),
        ),
    )
}

pub fn get_last_modified(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or(DateTime::UNIX_EPOCH)
}
