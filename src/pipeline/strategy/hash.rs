use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::pipeline::strategy::{Strategy, SyncStrategy};
use crate::types::{ObjectEntry, ObjectPair, SkipReason};

const HASH_CHUNK_SIZE: usize = 32 * 1024;

const STRATEGY_NAME: &str = "HashStrategy";

/// Capability handed to [`HashStrategy`] for reading local objects, keeping
/// the strategy itself free of filesystem access.
#[async_trait]
pub trait LocalObjectOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

pub struct FsObjectOpener;

#[async_trait]
impl LocalObjectOpener for FsObjectOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        Ok(Box::new(file))
    }
}

/// Compares hash tokens and sizes, treating the source as the source of
/// truth. The token of a remote object (or a local one with a stored
/// entity tag) is its entity tag; otherwise an MD5 over the file content.
/// Composite multipart tags are never comparable, so either side having
/// one forces a copy.
pub struct HashStrategy {
    opener: Box<dyn LocalObjectOpener>,
}

#[async_trait]
impl SyncStrategy for HashStrategy {
    async fn should_sync(&self, pair: &ObjectPair) -> Result<Option<SkipReason>> {
        if pair.source.size != pair.destination.size {
            return Ok(None);
        }

        let source_token = self.hash_token(&pair.source).await;
        let destination_token = self.hash_token(&pair.destination).await;

        if is_multipart_token(&source_token) || is_multipart_token(&destination_token) {
            debug!(
                name = STRATEGY_NAME,
                key = pair.source.key,
                source_token = source_token,
                destination_token = destination_token,
                "multipart entity tag, tokens are not comparable."
            );

            return Ok(None);
        }

        if !source_token.is_empty() && source_token == destination_token {
            debug!(
                name = STRATEGY_NAME,
                key = pair.source.key,
                token = source_token,
                "object skipped."
            );

            return Ok(Some(SkipReason::EtagsMatch));
        }

        Ok(None)
    }
}

impl HashStrategy {
    pub fn boxed_new(opener: Box<dyn LocalObjectOpener>) -> Strategy {
        Box::new(HashStrategy { opener })
    }

    // An unreadable local file yields an empty token, which forces a copy;
    // the transfer itself surfaces the real error.
    async fn hash_token(&self, entry: &ObjectEntry) -> String {
        if entry.url.is_remote() || entry.e_tag.is_some() {
            return entry.normalized_e_tag().unwrap_or_default();
        }

        let Some(path) = entry.url.as_local_path() else {
            return String::new();
        };

        self.compute_md5(path).await.unwrap_or_default()
    }

    async fn compute_md5(&self, path: &Path) -> Result<String> {
        let mut reader = self.opener.open(path).await?;

        let mut md5_context = md5::Context::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let read_bytes = reader.read(&mut buffer).await?;
            if read_bytes == 0 {
                break;
            }
            md5_context.consume(&buffer[..read_bytes]);
        }

        Ok(hex::encode(md5_context.compute().0))
    }
}

fn is_multipart_token(token: &str) -> bool {
    token.contains('-')
}
