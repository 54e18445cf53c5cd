use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::storage::s3::S3StorageFactory;
use crate::storage::StorageFactory;
use crate::transfer::bandwidth::{BandwidthLimit, BandwidthLimiter, RateLimitedReader};
use crate::transfer::disk_space::validate_staging_space;
use crate::transfer::metrics::{CopyMetrics, TransferPhase};
use crate::transfer::retry::{
    RetryConfig, RetryEvent, RetryObserver, TracingRetryObserver, with_retry,
};
use crate::types::error::S3mirrorError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{ObjectUrl, StoragePath};

const STAGING_FILE_PREFIX: &str = "s3mirror-staging-";

/// Configuration of one client-side copy: download from the source store to
/// a local staging file, then upload to the destination store.
#[derive(Debug, Clone, Default)]
pub struct ClientCopyConfig {
    pub source_url: String,
    pub destination_url: String,
    pub bandwidth_limit: Option<String>,
    pub source_profile: Option<String>,
    pub destination_profile: Option<String>,
    pub source_endpoint_url: Option<String>,
    pub destination_endpoint_url: Option<String>,
    pub skip_disk_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Error(String),
    Warning(String),
}

impl ValidationIssue {
    pub fn is_warning(&self) -> bool {
        matches!(self, ValidationIssue::Warning(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ValidationIssue::Error(message) => message,
            ValidationIssue::Warning(message) => message,
        }
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::Error(message) => write!(f, "{message}"),
            ValidationIssue::Warning(message) => write!(f, "warning: {message}"),
        }
    }
}

impl ClientCopyConfig {
    /// Checks the whole configuration. Warnings do not abort the copy;
    /// errors do, before any I/O.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Some(limit) = &self.bandwidth_limit {
            if let Err(e) = BandwidthLimit::parse(limit) {
                issues.push(ValidationIssue::Error(format!("bandwidth validation: {e}")));
            }
        }

        if self.source_url.is_empty() {
            issues.push(ValidationIssue::Error(
                "source URL cannot be empty".to_string(),
            ));
        }
        if self.destination_url.is_empty() {
            issues.push(ValidationIssue::Error(
                "destination URL cannot be empty".to_string(),
            ));
        }
        if !self.source_url.is_empty() && self.source_url == self.destination_url {
            issues.push(ValidationIssue::Error(
                "source and destination URLs cannot be the same".to_string(),
            ));
        }

        // a custom endpoint usually belongs to a specific profile
        if self.source_profile.is_none() && self.source_endpoint_url.is_some() {
            issues.push(ValidationIssue::Warning(
                "source endpoint specified without profile".to_string(),
            ));
        }
        if self.destination_profile.is_none() && self.destination_endpoint_url.is_some() {
            issues.push(ValidationIssue::Warning(
                "destination endpoint specified without profile".to_string(),
            ));
        }

        issues
    }

    pub fn config_summary(&self) -> String {
        format!(
            "Source: {}, Destination: {}, Bandwidth: {}, SkipDiskCheck: {}",
            self.source_url,
            self.destination_url,
            self.bandwidth_limit.as_deref().unwrap_or("unlimited"),
            self.skip_disk_check
        )
    }
}

// Counts retries for the metrics record while forwarding events to the
// tracing observer.
struct RecordingRetryObserver {
    inner: TracingRetryObserver,
    retries: AtomicU32,
}

impl RecordingRetryObserver {
    fn new() -> Self {
        Self {
            inner: TracingRetryObserver,
            retries: AtomicU32::new(0),
        }
    }

    fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }
}

impl RetryObserver for RecordingRetryObserver {
    fn on_event(&self, event: RetryEvent<'_>) {
        if matches!(event, RetryEvent::Retrying { .. }) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.on_event(event);
    }
}

/// Orchestrates one client-side copy: validate, disk check, download to a
/// staging file, upload, cleanup, metrics summary.
pub struct ClientCopier {
    config: ClientCopyConfig,
    retry_config: RetryConfig,
    staging_dir: PathBuf,
    cancellation_token: PipelineCancellationToken,
}

impl ClientCopier {
    pub fn new(
        config: ClientCopyConfig,
        retry_config: RetryConfig,
        staging_dir: PathBuf,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            retry_config,
            staging_dir,
            cancellation_token,
        }
    }

    pub async fn copy(&self) -> Result<CopyMetrics> {
        self.validate_config()?;
        let (source_bucket, source_key) = parse_remote_url(&self.config.source_url)?;
        let (destination_bucket, destination_key) =
            parse_remote_url(&self.config.destination_url)?;

        let bandwidth_limit = self
            .config
            .bandwidth_limit
            .as_deref()
            .map(BandwidthLimit::parse)
            .transpose()?
            .flatten();
        let rate_limiter = bandwidth_limit.map(|limit| Arc::new(BandwidthLimiter::new(limit)));

        let mut metrics = CopyMetrics::new(
            self.config.source_url.clone(),
            self.config.destination_url.clone(),
            bandwidth_limit,
            self.config.skip_disk_check,
            self.staging_dir.clone(),
        );

        debug!(config = self.config.config_summary(), "client copy started.");

        let observer = RecordingRetryObserver::new();
        let result = self
            .run_phases(
                &mut metrics,
                &observer,
                &rate_limiter,
                source_bucket,
                source_key,
                destination_bucket,
                destination_key,
            )
            .await;

        metrics.add_retry_attempts(observer.retries());
        if let Err(e) = &result {
            metrics.record_error(e);
        }
        metrics.log_summary();

        result.map(|()| metrics)
    }

    // Preconditions checked before any I/O. Warnings are logged and do not
    // abort.
    fn validate_config(&self) -> Result<()> {
        let issues = self.config.validate();
        for issue in &issues {
            if issue.is_warning() {
                warn!(message = issue.message(), "client copy configuration warning.");
            }
        }
        if let Some(issue) = issues.iter().find(|issue| !issue.is_warning()) {
            return Err(anyhow!(S3mirrorError::ConfigError(
                issue.message().to_string()
            )));
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        metrics: &mut CopyMetrics,
        observer: &RecordingRetryObserver,
        rate_limiter: &Option<Arc<BandwidthLimiter>>,
        source_bucket: String,
        source_key: String,
        destination_bucket: String,
        destination_key: String,
    ) -> Result<()> {
        let (stats_sender, _stats_receiver) = async_channel::unbounded();

        let source_storage = S3StorageFactory::create(
            StoragePath::S3 {
                bucket: source_bucket,
                prefix: String::new(),
            },
            self.cancellation_token.clone(),
            stats_sender.clone(),
            Some(ClientConfig {
                profile: self.config.source_profile.clone(),
                endpoint_url: self.config.source_endpoint_url.clone(),
                force_path_style: false,
            }),
            None,
        )
        .await;

        let destination_storage = S3StorageFactory::create(
            StoragePath::S3 {
                bucket: destination_bucket,
                prefix: String::new(),
            },
            self.cancellation_token.clone(),
            stats_sender,
            Some(ClientConfig {
                profile: self.config.destination_profile.clone(),
                endpoint_url: self.config.destination_endpoint_url.clone(),
                force_path_style: false,
            }),
            None,
        )
        .await;

        let stat_started = Instant::now();
        let source_entry = source_storage
            .stat_object(&source_key)
            .await
            .context("failed to get source object info")?;
        metrics.set_network_latency(stat_started.elapsed());

        if !self.config.skip_disk_check {
            let disk_space = validate_staging_space(&self.staging_dir, source_entry.size as u64)?;
            metrics.set_disk_space_info(disk_space.required, disk_space.available);
        }

        let staging_file = tempfile::Builder::new()
            .prefix(STAGING_FILE_PREFIX)
            .tempfile_in(&self.staging_dir)
            .context("failed to create staging file")?;
        let staging_path = staging_file.path().to_path_buf();

        metrics.start_download();
        let downloaded_bytes = {
            let source_storage = &source_storage;
            let staging_path = &staging_path;
            with_retry(
                &self.retry_config,
                &self.cancellation_token,
                observer,
                "download",
                move || {
                    let rate_limiter = rate_limiter.clone();
                    let cancellation_token = self.cancellation_token.clone();
                    let source_key = source_key.clone();
                    async move {
                        // each attempt starts over on a truncated file
                        let mut file = tokio::fs::OpenOptions::new()
                            .write(true)
                            .truncate(true)
                            .open(staging_path)
                            .await
                            .context("failed to open staging file")?;

                        let reader = source_storage.get_object_reader(&source_key).await?;
                        let mut reader = RateLimitedReader::new(
                            reader,
                            rate_limiter,
                            None,
                            cancellation_token,
                        );

                        let downloaded_bytes = tokio::io::copy(&mut reader, &mut file)
                            .await
                            .context("download to staging file failed")?;
                        file.flush().await?;

                        Ok(downloaded_bytes)
                    }
                },
            )
            .await?
        };
        metrics.end_download();
        metrics.set_total_bytes(downloaded_bytes);
        metrics.add_throughput_sample(downloaded_bytes, TransferPhase::Download);

        metrics.start_upload();
        {
            let destination_storage = &destination_storage;
            let staging_path = &staging_path;
            with_retry(
                &self.retry_config,
                &self.cancellation_token,
                observer,
                "upload",
                move || {
                    let rate_limiter = rate_limiter.clone();
                    let cancellation_token = self.cancellation_token.clone();
                    let destination_key = destination_key.clone();
                    async move {
                        let file = tokio::fs::File::open(staging_path)
                            .await
                            .context("failed to open staging file")?;
                        let reader = RateLimitedReader::new(
                            file,
                            rate_limiter,
                            None,
                            cancellation_token,
                        );

                        destination_storage
                            .put_object(
                                &destination_key,
                                Box::new(reader),
                                downloaded_bytes,
                                None,
                            )
                            .await
                    }
                },
            )
            .await?
        };
        metrics.end_upload();
        metrics.add_throughput_sample(2 * downloaded_bytes, TransferPhase::Upload);

        // cleanup is best-effort; a leftover staging file must never fail
        // an otherwise successful copy
        if let Err(e) = staging_file.close() {
            warn!(error = %e, "failed to remove staging file.");
        }

        Ok(())
    }
}

fn parse_remote_url(raw_url: &str) -> Result<(String, String)> {
    match ObjectUrl::parse(raw_url) {
        ObjectUrl::Remote { bucket, key } if !key.is_empty() => Ok((bucket, key)),
        _ => Err(anyhow!(S3mirrorError::ConfigError(format!(
            "client copy requires s3://<bucket>/<key> URLs on both sides: {raw_url}"
        )))),
    }
}
