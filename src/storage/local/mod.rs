use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::config::ClientConfig;
use crate::storage::{Storage, StorageFactory, StorageTrait};
use crate::transfer::bandwidth::BandwidthLimiter;
use crate::types::error::S3mirrorError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, ObjectUrl, StoragePath, SyncStatistics};

pub mod fs_util;

pub struct LocalStorageFactory;

#[async_trait]
impl StorageFactory for LocalStorageFactory {
    async fn create(
        storage_path: StoragePath,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        _client_config: Option<ClientConfig>,
        _rate_limiter: Option<Arc<BandwidthLimiter>>,
    ) -> Storage {
        let StoragePath::Local(root) = &storage_path else {
            panic!("not a local storage path.")
        };

        Box::new(LocalStorage {
            root: root.clone(),
            cancellation_token,
            stats_sender,
        })
    }
}

#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
}

impl LocalStorage {
    fn entry_from_metadata(
        &self,
        key: String,
        path: PathBuf,
        metadata: &std::fs::Metadata,
    ) -> ObjectEntry {
        ObjectEntry {
            key,
            url: ObjectUrl::Local(path),
            size: metadata.len() as i64,
            last_modified: fs_util::get_last_modified(metadata),
            e_tag: None,
        }
    }
}

#[async_trait]
impl StorageTrait for LocalStorage {
    fn is_local_storage(&self) -> bool {
        true
    }

    fn object_url(&self, key: &str) -> ObjectUrl {
        ObjectUrl::Local(fs_util::key_to_file_path(&self.root, key))
    }

    async fn list_objects(&self, sender: &Sender<ObjectEntry>, _max_keys: i32) -> Result<()> {
        trace!(root = %self.root.display(), "listing local directory.");

        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.context("walkdir failed.")?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(key) = fs_util::file_path_to_key(&self.root, entry.path()) else {
                continue;
            };
            let metadata = entry.metadata().context("walkdir metadata failed.")?;
            let object_entry =
                self.entry_from_metadata(key, entry.path().to_path_buf(), &metadata);

            tokio::select! {
                result = sender.send(object_entry) => {
                    if result.is_err() {
                        // the consumer is gone, normal shutdown
                        return Ok(());
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    debug!("local listing has been cancelled.");
                    return Err(anyhow!(S3mirrorError::Cancelled));
                }
            }
        }

        trace!(root = %self.root.display(), "listing local directory completed.");
        Ok(())
    }

    async fn stat_object(&self, key: &str) -> Result<ObjectEntry> {
        let path = fs_util::key_to_file_path(&self.root, key);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("no object found. key={key}."))?;

        Ok(self.entry_from_metadata(key.to_string(), path, &metadata))
    }

    async fn get_object_reader(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let path = fs_util::key_to_file_path(&self.root, key);
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        Ok(Box::new(file))
    }

    async fn put_object(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        _size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if fs_util::check_directory_traversal(key) {
            return Err(anyhow!("a object references a parent directory. key={key}."));
        }

        let path = fs_util::key_to_file_path(&self.root, key);
        fs_util::create_directory_hierarchy(&path).await?;

        // write to a unique temp file first so a failed transfer never
        // leaves a half-written object under the final name
        let temp_file = tempfile::NamedTempFile::new_in(path.parent().unwrap())
            .context("NamedTempFile::new_in failed.")?;
        let temp_path = temp_file.path().to_path_buf();

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .context("failed to open staging file.")?;

        let written_bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .with_context(|| format!("write failed. key={key}."))?;
        file.flush().await?;
        drop(file);

        temp_file
            .persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;

        if let Some(last_modified) = last_modified {
            fs_util::set_last_modified(&path, last_modified)
                .with_context(|| format!("failed to set mtime on {}", path.display()))?;
        }

        self.send_stats(SyncStatistics::SyncBytes(written_bytes))
            .await;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = fs_util::key_to_file_path(&self.root, key);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove {}", path.display()))?;

        Ok(())
    }

    fn get_stats_sender(&self) -> Sender<SyncStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }
}
