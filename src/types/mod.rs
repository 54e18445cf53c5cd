use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub mod error;
pub mod token;

pub const S3_URL_PREFIX: &str = "s3://";

/// A source or destination location. `s3://bucket/key` denotes a remote
/// object; any other form is a local path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectUrl {
    Remote { bucket: String, key: String },
    Local(PathBuf),
}

impl ObjectUrl {
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(S3_URL_PREFIX) {
            let (bucket, key) = match rest.split_once('/') {
                Some((bucket, key)) => (bucket.to_string(), key.to_string()),
                None => (rest.to_string(), String::new()),
            };
            ObjectUrl::Remote { bucket, key }
        } else {
            ObjectUrl::Local(PathBuf::from(raw))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ObjectUrl::Remote { .. })
    }

    pub fn as_local_path(&self) -> Option<&Path> {
        match self {
            ObjectUrl::Local(path) => Some(path),
            ObjectUrl::Remote { .. } => None,
        }
    }
}

impl Display for ObjectUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ObjectUrl::Remote { bucket, key } => write!(f, "{S3_URL_PREFIX}{bucket}/{key}"),
            ObjectUrl::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A listing root. Objects under a root are addressed by a key relative to
/// the root's prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
    Local(PathBuf),
}

impl StoragePath {
    pub fn is_remote(&self) -> bool {
        matches!(self, StoragePath::S3 { .. })
    }

    /// Resolves a relative key against this root.
    pub fn join(&self, key: &str) -> ObjectUrl {
        match self {
            StoragePath::S3 { bucket, prefix } => ObjectUrl::Remote {
                bucket: bucket.clone(),
                key: join_key(prefix, key),
            },
            StoragePath::Local(path) => {
                let mut joined = path.clone();
                for component in key.split('/') {
                    joined.push(component);
                }
                ObjectUrl::Local(joined)
            }
        }
    }
}

impl Display for StoragePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoragePath::S3 { bucket, prefix } => write!(f, "{S3_URL_PREFIX}{bucket}/{prefix}"),
            StoragePath::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }

    if prefix.ends_with('/') {
        format!("{prefix}{key}")
    } else {
        format!("{prefix}/{key}")
    }
}

/// A single entry of a source or destination inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub url: ObjectUrl,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
}

impl ObjectEntry {
    pub fn normalized_e_tag(&self) -> Option<String> {
        normalize_e_tag(&self.e_tag)
    }

    /// A multipart upload leaves a composite entity tag containing a `-`
    /// separator; such tags are not comparable content digests.
    pub fn is_multipart_e_tag(&self) -> bool {
        is_multipart_upload_e_tag(&self.normalized_e_tag())
    }
}

/// Source and destination objects sharing the same key relative to their
/// roots.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPair {
    pub source: ObjectEntry,
    pub destination: ObjectEntry,
}

/// One concrete action emitted by the sync planner for worker execution.
/// Carries enough to invoke the transfer without re-listing.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPlanItem {
    Copy {
        source: ObjectEntry,
        destination: ObjectUrl,
    },
    Delete {
        key: String,
        url: ObjectUrl,
    },
}

/// Why a strategy decided that an object pair does not need a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SizesMatch,
    NewerAndSizesMatch,
    EtagsMatch,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SizesMatch => write!(f, "object sizes match"),
            SkipReason::NewerAndSizesMatch => {
                write!(f, "destination is newer or same age and sizes match")
            }
            SkipReason::EtagsMatch => write!(f, "object ETags match"),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SyncStatistics {
    SyncBytes(u64),
    SyncComplete { key: String },
    SyncSkip { key: String },
    SyncDelete { key: String },
    SyncError { key: String },
    SyncWarning { key: String },
}

pub fn normalize_e_tag(e_tag: &Option<String>) -> Option<String> {
    e_tag.as_ref().map(|e_tag| e_tag.replace('"', ""))
}

pub fn is_multipart_upload_e_tag(e_tag: &Option<String>) -> bool {
    e_tag
        .as_ref()
        .is_some_and(|e_tag| e_tag.contains('-'))
}
