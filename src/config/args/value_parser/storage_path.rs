use std::path::PathBuf;

use crate::types::{S3_URL_PREFIX, StoragePath};

const EMPTY_STORAGE_PATH: &str = "storage path must not be empty";
const EMPTY_BUCKET_NAME: &str = "bucket name must not be empty";

pub fn check_storage_path(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err(EMPTY_STORAGE_PATH.to_string());
    }

    if let Some(rest) = value.strip_prefix(S3_URL_PREFIX) {
        let bucket = rest.split_once('/').map_or(rest, |(bucket, _)| bucket);
        if bucket.is_empty() {
            return Err(EMPTY_BUCKET_NAME.to_string());
        }
    }

    Ok(value.to_string())
}

pub fn parse_storage_path(value: &str) -> StoragePath {
    if let Some(rest) = value.strip_prefix(S3_URL_PREFIX) {
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
            None => (rest.to_string(), String::new()),
        };
        StoragePath::S3 { bucket, prefix }
    } else {
        StoragePath::Local(PathBuf::from(value))
    }
}
