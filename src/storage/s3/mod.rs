use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::storage::{Storage, StorageFactory, StorageTrait, convert_to_byte_stream_with_limit};
use crate::transfer::bandwidth::BandwidthLimiter;
use crate::types::error::S3mirrorError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, ObjectUrl, StoragePath, SyncStatistics};

mod client_builder;

pub struct S3StorageFactory;

#[async_trait]
impl StorageFactory for S3StorageFactory {
    async fn create(
        storage_path: StoragePath,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        client_config: Option<ClientConfig>,
        rate_limiter: Option<Arc<BandwidthLimiter>>,
    ) -> Storage {
        let StoragePath::S3 { bucket, prefix } = &storage_path else {
            panic!("not an s3 storage path.")
        };

        let client = client_config.unwrap_or_default().create_client().await;

        Box::new(S3Storage {
            client: Arc::new(client),
            bucket: bucket.clone(),
            prefix: prefix.clone(),
            cancellation_token,
            stats_sender,
            rate_limiter,
        })
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Arc<Client>,
    bucket: String,
    prefix: String,
    cancellation_token: PipelineCancellationToken,
    stats_sender: Sender<SyncStatistics>,
    rate_limiter: Option<Arc<BandwidthLimiter>>,
}

impl S3Storage {
    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            return key.to_string();
        }

        if self.prefix.ends_with('/') {
            format!("{}{}", self.prefix, key)
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn relative_key<'a>(&self, full_key: &'a str) -> &'a str {
        let relative = full_key.strip_prefix(&self.prefix).unwrap_or(full_key);
        relative.strip_prefix('/').unwrap_or(relative)
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    fn is_local_storage(&self) -> bool {
        false
    }

    fn object_url(&self, key: &str) -> ObjectUrl {
        ObjectUrl::Remote {
            bucket: self.bucket.clone(),
            key: self.full_key(key),
        }
    }

    async fn list_objects(&self, sender: &Sender<ObjectEntry>, max_keys: i32) -> Result<()> {
        trace!(bucket = self.bucket, prefix = self.prefix, "listing bucket.");

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .max_keys(max_keys)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page?;

            for object in page.contents() {
                let Some(full_key) = object.key() else {
                    continue;
                };
                let key = self.relative_key(full_key).to_string();
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }

                let entry = ObjectEntry {
                    url: ObjectUrl::Remote {
                        bucket: self.bucket.clone(),
                        key: full_key.to_string(),
                    },
                    key,
                    size: object.size().unwrap_or_default(),
                    last_modified: object
                        .last_modified()
                        .map(to_chrono)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                    e_tag: object.e_tag().map(|e_tag| e_tag.to_string()),
                };

                tokio::select! {
                    result = sender.send(entry) => {
                        if result.is_err() {
                            // the consumer is gone, normal shutdown
                            return Ok(());
                        }
                    },
                    _ = self.cancellation_token.cancelled() => {
                        debug!("bucket listing has been cancelled.");
                        return Err(anyhow!(S3mirrorError::Cancelled));
                    }
                }
            }
        }

        trace!(bucket = self.bucket, prefix = self.prefix, "listing bucket completed.");
        Ok(())
    }

    async fn stat_object(&self, key: &str) -> Result<ObjectEntry> {
        let full_key = self.full_key(key);
        let head_object_output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await?;

        Ok(ObjectEntry {
            key: key.to_string(),
            url: ObjectUrl::Remote {
                bucket: self.bucket.clone(),
                key: full_key,
            },
            size: head_object_output.content_length().unwrap_or_default(),
            last_modified: head_object_output
                .last_modified()
                .map(to_chrono)
                .unwrap_or(DateTime::UNIX_EPOCH),
            e_tag: head_object_output.e_tag().map(|e_tag| e_tag.to_string()),
        })
    }

    async fn get_object_reader(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await?;

        Ok(Box::new(get_object_output.body.into_async_read()))
    }

    async fn put_object(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        size: u64,
        _last_modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let body = convert_to_byte_stream_with_limit(
            reader,
            self.stats_sender.clone(),
            self.rate_limiter.clone(),
            self.cancellation_token.clone(),
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .with_context(|| format!("put_object failed. key={key}."))?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await?;

        Ok(())
    }

    fn get_stats_sender(&self) -> Sender<SyncStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: SyncStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }
}

fn to_chrono(date_time: &aws_smithy_types::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(date_time.secs(), date_time.subsec_nanos())
        .unwrap_or(DateTime::UNIX_EPOCH)
}
