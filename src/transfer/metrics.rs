use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::transfer::bandwidth::BandwidthLimit;

const LAST_ERROR_SUMMARY_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Download,
    Upload,
}

impl TransferPhase {
    fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Download => "download",
            TransferPhase::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThroughputSample {
    pub taken_at: Instant,
    pub bytes_total: u64,
    pub phase: TransferPhase,
}

/// Passive per-operation record of a client copy. Single writer; appended
/// to while the operation runs and read after it completes.
#[derive(Debug)]
pub struct CopyMetrics {
    pub start_time: Instant,
    pub download_start_time: Option<Instant>,
    pub download_end_time: Option<Instant>,
    pub upload_start_time: Option<Instant>,
    pub upload_end_time: Option<Instant>,
    pub total_bytes: u64,
    pub source_url: String,
    pub destination_url: String,
    pub bandwidth_limit: Option<BandwidthLimit>,
    pub disk_check_skipped: bool,
    pub staging_dir: PathBuf,

    pub retry_attempts: u32,
    pub disk_space_used: u64,
    pub disk_space_available: u64,
    pub network_latency: Duration,
    pub throughput_samples: Vec<ThroughputSample>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl CopyMetrics {
    pub fn new(
        source_url: String,
        destination_url: String,
        bandwidth_limit: Option<BandwidthLimit>,
        disk_check_skipped: bool,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            download_start_time: None,
            download_end_time: None,
            upload_start_time: None,
            upload_end_time: None,
            total_bytes: 0,
            source_url,
            destination_url,
            bandwidth_limit,
            disk_check_skipped,
            staging_dir,
            retry_attempts: 0,
            disk_space_used: 0,
            disk_space_available: 0,
            network_latency: Duration::ZERO,
            throughput_samples: Vec::new(),
            error_count: 0,
            last_error: None,
        }
    }

    pub fn start_download(&mut self) {
        self.download_start_time = Some(Instant::now());
    }

    pub fn end_download(&mut self) {
        self.download_end_time = Some(Instant::now());
    }

    pub fn start_upload(&mut self) {
        self.upload_start_time = Some(Instant::now());
    }

    pub fn end_upload(&mut self) {
        self.upload_end_time = Some(Instant::now());
    }

    pub fn set_total_bytes(&mut self, bytes: u64) {
        self.total_bytes = bytes;
    }

    pub fn add_retry_attempts(&mut self, attempts: u32) {
        self.retry_attempts += attempts;
    }

    pub fn set_disk_space_info(&mut self, used: u64, available: u64) {
        self.disk_space_used = used;
        self.disk_space_available = available;
    }

    pub fn set_network_latency(&mut self, latency: Duration) {
        self.network_latency = latency;
    }

    pub fn add_throughput_sample(&mut self, bytes_total: u64, phase: TransferPhase) {
        self.throughput_samples.push(ThroughputSample {
            taken_at: Instant::now(),
            bytes_total,
            phase,
        });
    }

    pub fn record_error(&mut self, error: &anyhow::Error) {
        self.error_count += 1;
        self.last_error = Some(format!("{error:#}"));
    }

    pub fn download_duration(&self) -> Duration {
        match (self.download_start_time, self.download_end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn upload_duration(&self) -> Duration {
        match (self.upload_start_time, self.upload_end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn total_duration(&self) -> Duration {
        match self.upload_end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    pub fn average_speed(&self) -> f64 {
        speed(self.total_bytes, self.total_duration())
    }

    pub fn download_speed(&self) -> f64 {
        speed(self.total_bytes, self.download_duration())
    }

    pub fn upload_speed(&self) -> f64 {
        speed(self.total_bytes, self.upload_duration())
    }

    /// Maximum Δbytes/Δt over adjacent samples with positive intervals.
    pub fn peak_throughput(&self) -> f64 {
        let mut max_throughput = 0f64;

        for window in self.throughput_samples.windows(2) {
            let time_diff = window[1]
                .taken_at
                .duration_since(window[0].taken_at)
                .as_secs_f64();
            if time_diff <= 0.0 || window[1].bytes_total <= window[0].bytes_total {
                continue;
            }

            let throughput = (window[1].bytes_total - window[0].bytes_total) as f64 / time_diff;
            if max_throughput < throughput {
                max_throughput = throughput;
            }
        }

        max_throughput
    }

    /// Average speed as a percentage of the configured limit; 0 when no
    /// limit is set.
    pub fn efficiency(&self) -> f64 {
        let Some(limit) = self.bandwidth_limit else {
            return 0.0;
        };

        self.average_speed() / limit.bytes_per_sec() as f64 * 100.0
    }

    fn last_error_summary(&self) -> String {
        let Some(last_error) = &self.last_error else {
            return "none".to_string();
        };

        if last_error.chars().count() > LAST_ERROR_SUMMARY_MAX_CHARS {
            let truncated: String = last_error
                .chars()
                .take(LAST_ERROR_SUMMARY_MAX_CHARS - 3)
                .collect();
            format!("{truncated}...")
        } else {
            last_error.clone()
        }
    }

    fn bandwidth_limit_summary(&self) -> String {
        match self.bandwidth_limit {
            Some(limit) => format!("{}/s", human_bytes(limit.bytes_per_sec())),
            None => "unlimited".to_string(),
        }
    }

    /// One debug summary per operation, emitted after cleanup.
    pub fn log_summary(&self) {
        debug!(
            source = self.source_url,
            destination = self.destination_url,
            total_bytes = human_bytes(self.total_bytes),
            total_duration_millis = self.total_duration().as_millis() as u64,
            download_duration_millis = self.download_duration().as_millis() as u64,
            upload_duration_millis = self.upload_duration().as_millis() as u64,
            average_speed = human_speed(self.average_speed()),
            download_speed = human_speed(self.download_speed()),
            upload_speed = human_speed(self.upload_speed()),
            peak_throughput = human_speed(self.peak_throughput()),
            bandwidth_limit = self.bandwidth_limit_summary(),
            disk_check_skipped = self.disk_check_skipped,
            disk_space_used = human_bytes_or_na(self.disk_space_used),
            disk_space_available = human_bytes_or_na(self.disk_space_available),
            network_latency_millis = self.network_latency.as_millis() as u64,
            retry_attempts = self.retry_attempts,
            error_count = self.error_count,
            last_error = self.last_error_summary(),
            staging_dir = %self.staging_dir.display(),
            "client copy operation summary."
        );
    }
}

fn speed(bytes: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds == 0.0 || bytes == 0 {
        return 0.0;
    }

    bytes as f64 / seconds
}

pub fn human_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;

    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefix)
}

pub fn human_speed(bytes_per_second: f64) -> String {
    format!("{}/s", human_bytes(bytes_per_second as u64))
}

fn human_bytes_or_na(bytes: u64) -> String {
    if bytes == 0 {
        return "N/A".to_string();
    }

    human_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::path::PathBuf;

    fn test_metrics() -> CopyMetrics {
        CopyMetrics::new(
            "s3://source-bucket/data1".to_string(),
            "s3://target-bucket/data1".to_string(),
            None,
            false,
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn durations_are_zero_before_phases_run() {
        init_dummy_tracing_subscriber();

        let metrics = test_metrics();
        assert_eq!(metrics.download_duration(), Duration::ZERO);
        assert_eq!(metrics.upload_duration(), Duration::ZERO);
        assert_eq!(metrics.average_speed(), 0.0);
        assert_eq!(metrics.download_speed(), 0.0);
        assert_eq!(metrics.upload_speed(), 0.0);
    }

    #[test]
    fn phase_durations_follow_marks() {
        init_dummy_tracing_subscriber();

        let mut metrics = test_metrics();
        metrics.start_download();
        std::thread::sleep(Duration::from_millis(5));
        metrics.end_download();
        metrics.start_upload();
        std::thread::sleep(Duration::from_millis(5));
        metrics.end_upload();
        metrics.set_total_bytes(1024 * 1024);

        assert!(Duration::ZERO < metrics.download_duration());
        assert!(Duration::ZERO < metrics.upload_duration());
        assert!(metrics.download_duration() <= metrics.total_duration());
        assert!(0.0 < metrics.average_speed());
    }

    #[test]
    fn peak_throughput_scans_pairwise() {
        init_dummy_tracing_subscriber();

        let mut metrics = test_metrics();
        assert_eq!(metrics.peak_throughput(), 0.0);

        metrics.add_throughput_sample(0, TransferPhase::Download);
        std::thread::sleep(Duration::from_millis(5));
        metrics.add_throughput_sample(1024 * 1024, TransferPhase::Download);
        std::thread::sleep(Duration::from_millis(20));
        metrics.add_throughput_sample(2 * 1024 * 1024, TransferPhase::Upload);

        // both intervals move 1 MiB; the peak is at least the average of
        // the whole window
        let peak = metrics.peak_throughput();
        let window = metrics.throughput_samples[2]
            .taken_at
            .duration_since(metrics.throughput_samples[0].taken_at)
            .as_secs_f64();
        assert!(0.0 < peak);
        assert!((2.0 * 1024.0 * 1024.0) / window <= peak);
    }

    #[test]
    fn efficiency_requires_limit() {
        init_dummy_tracing_subscriber();

        let mut metrics = test_metrics();
        metrics.set_total_bytes(1024);
        assert_eq!(metrics.efficiency(), 0.0);

        let mut metrics = CopyMetrics::new(
            "s3://source-bucket/data1".to_string(),
            "s3://target-bucket/data1".to_string(),
            BandwidthLimit::parse("1MB/s").unwrap(),
            false,
            PathBuf::from("/tmp"),
        );
        metrics.start_download();
        metrics.end_download();
        metrics.start_upload();
        metrics.set_total_bytes(10 * 1024 * 1024);
        metrics.end_upload();

        assert!(0.0 < metrics.efficiency());
    }

    #[test]
    fn last_error_is_truncated() {
        init_dummy_tracing_subscriber();

        let mut metrics = test_metrics();
        assert_eq!(metrics.last_error_summary(), "none");

        metrics.record_error(&anyhow!("short error"));
        assert_eq!(metrics.last_error_summary(), "short error");
        assert_eq!(metrics.error_count, 1);

        metrics.record_error(&anyhow!("{}", "x".repeat(150)));
        let summary = metrics.last_error_summary();
        assert_eq!(summary.chars().count(), 100);
        assert!(summary.ends_with("..."));
        assert_eq!(metrics.error_count, 2);
    }

    #[test]
    fn human_bytes_formatting() {
        init_dummy_tracing_subscriber();

        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1024), "1.0 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn log_summary_smoke() {
        init_dummy_tracing_subscriber();

        let mut metrics = test_metrics();
        metrics.set_total_bytes(42);
        metrics.log_summary();
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
