use std::sync::Arc;

use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::body::SdkBody;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use futures_util::stream::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::ReaderStream;

use crate::config::ClientConfig;
use crate::transfer::bandwidth::{BandwidthLimiter, RateLimitedReader};
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectEntry, ObjectUrl, StoragePath, SyncStatistics};

pub mod local;
pub mod s3;

pub type Storage = Box<dyn StorageTrait + Send + Sync>;

#[async_trait]
pub trait StorageFactory {
    async fn create(
        storage_path: StoragePath,
        cancellation_token: PipelineCancellationToken,
        stats_sender: Sender<SyncStatistics>,
        client_config: Option<ClientConfig>,
        rate_limiter: Option<Arc<BandwidthLimiter>>,
    ) -> Storage;
}

/// The surface the sync and copy engines consume. Keys are relative to the
/// storage root.
#[async_trait]
pub trait StorageTrait: DynClone {
    fn is_local_storage(&self) -> bool;
    fn object_url(&self, key: &str) -> ObjectUrl;
    async fn list_objects(&self, sender: &Sender<ObjectEntry>, max_keys: i32) -> Result<()>;
    async fn stat_object(&self, key: &str) -> Result<ObjectEntry>;
    async fn get_object_reader(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>>;
    async fn put_object(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete_object(&self, key: &str) -> Result<()>;
    fn get_stats_sender(&self) -> Sender<SyncStatistics>;
    async fn send_stats(&self, stats: SyncStatistics);
}

/// Bridges a reader into an SDK `ByteStream`, threading the byte counter
/// and the optional bandwidth limiter through the stream.
pub fn convert_to_byte_stream_with_limit<R>(
    reader: R,
    stats_sender: Sender<SyncStatistics>,
    rate_limiter: Option<Arc<BandwidthLimiter>>,
    cancellation_token: PipelineCancellationToken,
) -> ByteStream
where
    R: AsyncRead + Send + Sync + 'static,
{
    let async_read =
        RateLimitedReader::new(reader, rate_limiter, Some(stats_sender), cancellation_token);

    let buf_reader = BufReader::new(async_read);

    let reader_stream = ReaderStream::new(buf_reader).map_ok(Frame::data);

    let stream_body = StreamBody::new(reader_stream);

    let boxed_body = BodyExt::boxed(stream_body);

    ByteStream::new(SdkBody::from_body_1_x(boxed_body))
}
