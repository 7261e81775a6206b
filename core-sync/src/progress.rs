//! Download progress accounting.
//!
//! Per-file percentages come straight from the bytes written against the
//! advertised `Content-Length`. Plan-wide rate and ETA are derived from the
//! running byte total against [`SyncPlan::total_bytes`](crate::plan::SyncPlan).

use core_runtime::events::DownloadEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum bytes received before an ETA is reported.
pub const DEFAULT_ETA_MIN_BYTES: u64 = 10 * 1024;

/// Per-chunk progress of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub file_name: String,
    /// 0..=100
    pub percent: u8,
    pub downloaded_bytes: u64,
    /// 0 when the server did not advertise a length
    pub total_size: u64,
}

impl ProgressEvent {
    pub fn new(file_name: impl Into<String>, downloaded_bytes: u64, total_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            percent: percent_of(downloaded_bytes, total_size),
            downloaded_bytes,
            total_size,
        }
    }

    /// Wrap into the bus event, adding the plan-wide figures.
    pub fn into_download_event(self, tracker: &TransferTracker) -> DownloadEvent {
        DownloadEvent::FileProgress {
            file_name: self.file_name,
            percent: self.percent,
            downloaded_bytes: self.downloaded_bytes,
            total_size: self.total_size,
            overall_downloaded: tracker.downloaded_bytes(),
            overall_total: tracker.total_bytes(),
            eta_secs: tracker.eta(),
        }
    }
}

/// `floor(done / total * 100)`, clamped to 100. Zero when `total` is unknown.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (done as u128 * 100) / total as u128;
    percent.min(100) as u8
}

/// `round(done / total * 100)`, used for verification progress.
pub fn rounded_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (done as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Running byte totals across every file of a plan.
#[derive(Debug, Clone)]
pub struct TransferTracker {
    total_bytes: u64,
    min_bytes_for_eta: u64,
    per_file: HashMap<String, u64>,
    started: Instant,
}

impl TransferTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            min_bytes_for_eta: DEFAULT_ETA_MIN_BYTES,
            per_file: HashMap::new(),
            started: Instant::now(),
        }
    }

    pub fn with_min_bytes_for_eta(mut self, min_bytes: u64) -> Self {
        self.min_bytes_for_eta = min_bytes;
        self
    }

    /// Record the latest byte count of one file.
    ///
    /// Counts are per file rather than deltas, so a retried file does not
    /// count twice.
    pub fn update(&mut self, file_name: &str, downloaded_bytes: u64) {
        self.per_file
            .insert(file_name.to_string(), downloaded_bytes);
    }

    /// Drop a file's bytes, e.g. when its partial download was discarded.
    pub fn reset_file(&mut self, file_name: &str) {
        self.per_file.remove(file_name);
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.per_file.values().sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whole seconds remaining at the current average rate.
    ///
    /// `None` until enough bytes have arrived for a stable estimate, and
    /// when the plan size is unknown.
    pub fn eta(&self) -> Option<u64> {
        self.eta_at(self.elapsed())
    }

    /// [`eta`](Self::eta) evaluated at an explicit elapsed time.
    pub fn eta_at(&self, elapsed: Duration) -> Option<u64> {
        let downloaded = self.downloaded_bytes();
        if self.total_bytes == 0 || downloaded < self.min_bytes_for_eta || downloaded == 0 {
            return None;
        }
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        let rate = downloaded as f64 / secs;
        let remaining = self.total_bytes.saturating_sub(downloaded) as f64;
        Some((remaining / rate).floor() as u64)
    }
}

/// Render an ETA the way the launcher shows it: `"3m 20s"`, or
/// `"Calculating..."` while no estimate is available.
pub fn format_remaining(eta_secs: Option<u64>) -> String {
    match eta_secs {
        Some(secs) => format!("{}m {}s", secs / 60, secs % 60),
        None => "Calculating...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of_floors_and_clamps() {
        assert_eq!(percent_of(0, 100), 0);
        assert_eq!(percent_of(999, 1000), 99);
        assert_eq!(percent_of(1000, 1000), 100);
        assert_eq!(percent_of(1500, 1000), 100);
        assert_eq!(percent_of(10, 0), 0);
    }

    #[test]
    fn test_rounded_percent() {
        assert_eq!(rounded_percent(1, 3), 33);
        assert_eq!(rounded_percent(2, 3), 67);
        assert_eq!(rounded_percent(0, 0), 100);
    }

    #[test]
    fn test_progress_event() {
        let event = ProgressEvent::new("a.pbo", 50, 200);
        assert_eq!(event.percent, 25);
        assert_eq!(event.total_size, 200);
    }

    #[test]
    fn test_tracker_counts_latest_bytes_per_file() {
        let mut tracker = TransferTracker::new(300);
        tracker.update("a.pbo", 50);
        tracker.update("a.pbo", 100);
        tracker.update("b.pbo", 20);
        assert_eq!(tracker.downloaded_bytes(), 120);

        tracker.reset_file("b.pbo");
        assert_eq!(tracker.downloaded_bytes(), 100);
    }

    #[test]
    fn test_eta_requires_minimum_bytes() {
        let mut tracker = TransferTracker::new(100_000);
        tracker.update("a.pbo", 10_239);
        assert_eq!(tracker.eta_at(Duration::from_secs(1)), None);

        tracker.update("a.pbo", 20_000);
        // 20 000 B/s with 80 000 B left.
        assert_eq!(tracker.eta_at(Duration::from_secs(1)), Some(4));
    }

    #[test]
    fn test_eta_with_custom_threshold() {
        let mut tracker = TransferTracker::new(1_000).with_min_bytes_for_eta(0);
        tracker.update("a.pbo", 500);
        assert_eq!(tracker.eta_at(Duration::from_secs(5)), Some(5));
        assert_eq!(tracker.eta_at(Duration::ZERO), None);
    }

    #[test]
    fn test_eta_floors_partial_seconds() {
        let mut tracker = TransferTracker::new(2_000).with_min_bytes_for_eta(0);
        tracker.update("a.pbo", 1_000);
        // Half done after 59.6 s: 59.6 s left.
        let eta = tracker.eta_at(Duration::from_millis(59_600));
        assert_eq!(eta, Some(59));
        assert_eq!(format_remaining(eta), "0m 59s");
    }

    #[test]
    fn test_eta_unknown_without_plan_size() {
        let mut tracker = TransferTracker::new(0).with_min_bytes_for_eta(0);
        tracker.update("a.pbo", 4_096);
        assert_eq!(tracker.eta_at(Duration::from_secs(3)), None);
    }

    #[test]
    fn test_progress_event_into_download_event() {
        let mut tracker = TransferTracker::new(300);
        tracker.update("a.pbo", 50);
        tracker.update("b.pbo", 100);

        let event = ProgressEvent::new("b.pbo", 100, 200).into_download_event(&tracker);

        match event {
            DownloadEvent::FileProgress {
                file_name,
                percent,
                downloaded_bytes,
                total_size,
                overall_downloaded,
                overall_total,
                eta_secs,
            } => {
                assert_eq!(file_name, "b.pbo");
                assert_eq!(percent, 50);
                assert_eq!(downloaded_bytes, 100);
                assert_eq!(total_size, 200);
                assert_eq!(overall_downloaded, 150);
                assert_eq!(overall_total, 300);
                assert_eq!(eta_secs, None);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(None), "Calculating...");
        assert_eq!(format_remaining(Some(0)), "0m 0s");
        assert_eq!(format_remaining(Some(200)), "3m 20s");
    }
}
