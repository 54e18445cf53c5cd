use std::io::Result as IoResult;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Sender;
use leaky_bucket::RateLimiter;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::runtime::Handle;
use tokio::task;

use crate::types::SyncStatistics;
use crate::types::error::S3mirrorError;
use crate::types::token::PipelineCancellationToken;

const MIN_BANDWIDTH_BYTES_PER_SEC: u64 = 1024;
const MAX_BANDWIDTH_BYTES_PER_SEC: u64 = 100 * 1024 * 1024 * 1024;
const MIN_BURST_BYTES: u64 = 64 * 1024;

// default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: u64 = 10;
const REFILL_INTERVAL: Duration = Duration::from_millis(100);

/// A validated bandwidth ceiling in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthLimit {
    bytes_per_sec: u64,
}

impl BandwidthLimit {
    /// Parses a limit string such as `100MB/s`, `1.5GB/s` or `10Mbps`.
    /// `B/s` suffixes are bytes per second, `bps` suffixes bits per second;
    /// units are binary. An empty string disables the limit.
    pub fn parse(limit: &str) -> Result<Option<Self>> {
        if limit.is_empty() {
            return Ok(None);
        }

        let bytes_per_sec = parse_bandwidth_limit(limit)?;

        if bytes_per_sec < MIN_BANDWIDTH_BYTES_PER_SEC as f64 {
            return Err(anyhow!("bandwidth limit too low: minimum 1KB/s"));
        }
        if bytes_per_sec > MAX_BANDWIDTH_BYTES_PER_SEC as f64 {
            return Err(anyhow!("bandwidth limit too high: maximum 100GB/s"));
        }

        Ok(Some(BandwidthLimit {
            bytes_per_sec: bytes_per_sec as u64,
        }))
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// The maximum instantaneous reservation the bucket can satisfy without
    /// waiting: 10% of the rate, at least 64 KiB.
    pub fn burst(&self) -> u64 {
        (self.bytes_per_sec / REFILL_PER_INTERVAL_DIVIDER).max(MIN_BURST_BYTES)
    }
}

fn parse_bandwidth_limit(limit: &str) -> Result<f64> {
    let normalized = limit.trim().to_uppercase();

    let (number, multiplier) = if let Some(number) = normalized.strip_suffix("GBPS") {
        (number, 1024.0 * 1024.0 * 1024.0 / 8.0)
    } else if let Some(number) = normalized.strip_suffix("MBPS") {
        (number, 1024.0 * 1024.0 / 8.0)
    } else if let Some(number) = normalized.strip_suffix("KBPS") {
        (number, 1024.0 / 8.0)
    } else if let Some(number) = normalized.strip_suffix("GB/S") {
        (number, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(number) = normalized.strip_suffix("MB/S") {
        (number, 1024.0 * 1024.0)
    } else if let Some(number) = normalized.strip_suffix("KB/S") {
        (number, 1024.0)
    } else {
        return Err(anyhow!(
            "bandwidth limit must end with /s or bps (e.g. '100MB/s', '10Mbps'): {limit}"
        ));
    };

    let number = number
        .trim()
        .parse::<f64>()
        .map_err(|e| anyhow!("invalid number in bandwidth limit: {e}"))?;

    if number <= 0.0 {
        return Err(anyhow!("bandwidth limit must be positive"));
    }

    Ok(number * multiplier)
}

/// A process-wide token bucket. Concurrent reservations are serialized by
/// the bucket; reservations larger than the burst are chunked into
/// burst-sized acquisitions so that any amount can be satisfied without
/// deadlock.
pub struct BandwidthLimiter {
    limiter: RateLimiter,
    burst: u64,
}

impl BandwidthLimiter {
    pub fn new(limit: BandwidthLimit) -> Self {
        let burst = limit.burst();
        let refill = (limit.bytes_per_sec() / REFILL_PER_INTERVAL_DIVIDER).max(1);

        let limiter = RateLimiter::builder()
            .max(burst as usize)
            .initial(burst as usize)
            .refill(refill as usize)
            .interval(REFILL_INTERVAL)
            .fair(true)
            .build();

        Self { limiter, burst }
    }

    /// Reserves `amount` bytes, waiting until the bucket can satisfy them.
    /// The wait races the cancellation token and returns the cancellation
    /// error when it fires first.
    pub async fn acquire(
        &self,
        amount: usize,
        cancellation_token: &PipelineCancellationToken,
    ) -> Result<()> {
        let mut remaining = amount;
        while remaining > 0 {
            let chunk = remaining.min(self.burst as usize);

            tokio::select! {
                _ = self.limiter.acquire(chunk) => {
                    remaining -= chunk;
                },
                _ = cancellation_token.cancelled() => {
                    return Err(anyhow!(S3mirrorError::Cancelled));
                }
            }
        }

        Ok(())
    }
}

fn cancelled_io_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled")
}

/// Wraps a reader with bandwidth limiting. The underlying read runs first,
/// then exactly the number of bytes actually returned is reserved before
/// they are surfaced; the source decides the length, not the limiter.
///
/// When the reservation is cancelled, the bytes already read are surfaced
/// with the current poll and the next poll returns the cancellation error.
#[pin_project]
pub struct RateLimitedReader<R: AsyncRead + Send + Sync> {
    #[pin]
    inner: R,
    limiter: Option<Arc<BandwidthLimiter>>,
    stats_sender: Option<Sender<SyncStatistics>>,
    cancellation_token: PipelineCancellationToken,
    cancelled: bool,
}

impl<R: AsyncRead + Send + Sync> RateLimitedReader<R> {
    pub fn new(
        inner: R,
        limiter: Option<Arc<BandwidthLimiter>>,
        stats_sender: Option<Sender<SyncStatistics>>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            inner,
            limiter,
            stats_sender,
            cancellation_token,
            cancelled: false,
        }
    }
}

impl<R: AsyncRead + Send + Sync> AsyncRead for RateLimitedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        let this = self.project();

        if *this.cancelled {
            return Poll::Ready(Err(cancelled_io_error()));
        }

        let before = buf.filled().len();

        let result = this.inner.poll_read(cx, buf);
        if !result.is_ready() {
            return result;
        }

        let read_bytes = buf.filled().len() - before;

        if 0 < read_bytes {
            if let Some(limiter) = this.limiter.clone() {
                let cancellation_token = this.cancellation_token.clone();
                let acquired = task::block_in_place(move || {
                    Handle::current().block_on(async move {
                        limiter.acquire(read_bytes, &cancellation_token).await
                    })
                });

                if acquired.is_err() {
                    *this.cancelled = true;
                }
            }

            if let Some(stats_sender) = this.stats_sender {
                let _ = stats_sender.send_blocking(SyncStatistics::SyncBytes(read_bytes as u64));
            }
        }

        result
    }
}

/// Wraps a writer with bandwidth limiting. The caller decides the length,
/// so the reservation happens before the underlying write.
#[pin_project]
pub struct RateLimitedWriter<W: AsyncWrite + Send + Sync> {
    #[pin]
    inner: W,
    limiter: Option<Arc<BandwidthLimiter>>,
    stats_sender: Option<Sender<SyncStatistics>>,
    cancellation_token: PipelineCancellationToken,
}

impl<W: AsyncWrite + Send + Sync> RateLimitedWriter<W> {
    pub fn new(
        inner: W,
        limiter: Option<Arc<BandwidthLimiter>>,
        stats_sender: Option<Sender<SyncStatistics>>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            inner,
            limiter,
            stats_sender,
            cancellation_token,
        }
    }
}

impl<W: AsyncWrite + Send + Sync> AsyncWrite for RateLimitedWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.project();

        if !buf.is_empty() {
            if let Some(limiter) = this.limiter.clone() {
                let cancellation_token = this.cancellation_token.clone();
                let amount = buf.len();
                let acquired = task::block_in_place(move || {
                    Handle::current().block_on(async move {
                        limiter.acquire(amount, &cancellation_token).await
                    })
                });

                if acquired.is_err() {
                    return Poll::Ready(Err(cancelled_io_error()));
                }
            }
        }

        let result = this.inner.poll_write(cx, buf);

        if let (Poll::Ready(Ok(written_bytes)), Some(stats_sender)) = (&result, this.stats_sender)
        {
            if 0 < *written_bytes {
                let _ = stats_sender
                    .send_blocking(SyncStatistics::SyncBytes(*written_bytes as u64));
            }
        }

        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
