use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot of what a downloader has fetched so far.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStats {
    pub since: DateTime<Utc>,
    pub requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub transport_errors: u64,
    pub bytes: u64,
    pub status_codes: BTreeMap<u16, u64>,
    /// Requests answered, per host.
    pub hosts: BTreeMap<String, u64>,
    pub average_latency_ms: f64,
    #[serde(skip)]
    latency_ms_total: i64,
}

impl DownloadStats {
    fn new() -> Self {
        Self {
            since: Utc::now(),
            requests: 0,
            succeeded: 0,
            failed: 0,
            transport_errors: 0,
            bytes: 0,
            status_codes: BTreeMap::new(),
            hosts: BTreeMap::new(),
            average_latency_ms: 0.0,
            latency_ms_total: 0,
        }
    }
}

/// Download counters shared between a downloader and its summary.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    inner: Arc<Mutex<DownloadStats>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DownloadStats::new())),
        }
    }

    /// Records an answered request. Statuses of 400 and up count as failed.
    pub fn record(&self, host: &str, status: u16, bytes: usize, elapsed: Duration) {
        let mut stats = self.inner.lock();
        stats.requests += 1;
        if status < 400 {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
        stats.bytes += bytes as u64;
        *stats.status_codes.entry(status).or_default() += 1;
        *stats.hosts.entry(host.to_string()).or_default() += 1;
        stats.latency_ms_total += elapsed.num_milliseconds();
        stats.average_latency_ms = stats.latency_ms_total as f64 / stats.requests as f64;
    }

    /// A request that never got an HTTP answer.
    pub fn record_transport_error(&self) {
        self.inner.lock().transport_errors += 1;
    }

    pub fn snapshot(&self) -> DownloadStats {
        self.inner.lock().clone()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let tracker = StatsTracker::new();
        tracker.record("books.example.com", 200, 100, Duration::milliseconds(10));
        tracker.record("books.example.com", 404, 50, Duration::milliseconds(30));
        tracker.record("cdn.example.com", 301, 0, Duration::milliseconds(20));
        tracker.record_transport_error();

        let stats = tracker.snapshot();
        assert_eq!(stats.requests, 3);
        assert_eq!((stats.succeeded, stats.failed), (2, 1));
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.bytes, 150);
        assert_eq!(stats.status_codes.get(&404), Some(&1));
        assert_eq!(stats.hosts.get("books.example.com"), Some(&2));
        assert!((stats.average_latency_ms - 20.0).abs() < f64::EPSILON);

        let json = tracker.to_json();
        assert_eq!(json["requests"], 3);
        assert!(json.get("latency_ms_total").is_none());
    }
}
