//! In-memory metrics collection.
//!
//! Samples are labeled measurements kept per metric name with a bounded
//! retention window. Summaries are computed on demand; a background
//! sweeper prunes samples past retention.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One labeled measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    /// BTreeMap keeps label order deterministic for grouping keys.
    pub labels: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over one metric's samples within a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    /// Fraction of samples labeled `outcome=error`.
    pub error_rate: f64,
}

/// Convenience builder for label maps.
pub fn label_set<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Thread-safe sample sink with bounded retention.
///
/// Uses a std Mutex because every critical section is a short map
/// operation with no await points.
pub struct MetricsCollector {
    retention: ChronoDuration,
    samples: Mutex<HashMap<String, VecDeque<MetricSample>>>,
}

impl MetricsCollector {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: ChronoDuration::from_std(retention)
                .unwrap_or_else(|_| ChronoDuration::hours(24)),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record a sample under `name`.
    pub fn record(&self, name: &str, value: f64, labels: BTreeMap<String, String>) {
        let sample = MetricSample {
            name: name.to_string(),
            value,
            labels,
            timestamp: Utc::now(),
        };
        trace!(name, value, "metric recorded");
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.entry(name.to_string()).or_default().push_back(sample);
    }

    /// Summarize `name` over samples newer than `since` ago.
    ///
    /// Returns `None` when no samples fall in the window. Percentiles use
    /// the nearest-rank method.
    pub fn summary(&self, name: &str, since: Duration) -> Option<MetricSummary> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(since).unwrap_or_else(|_| ChronoDuration::hours(24));
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let window: Vec<&MetricSample> = samples
            .get(name)?
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .collect();
        if window.is_empty() {
            return None;
        }

        let count = window.len();
        let sum: f64 = window.iter().map(|s| s.value).sum();
        let errors = window
            .iter()
            .filter(|s| s.labels.get("outcome").map(String::as_str) == Some("error"))
            .count();

        let mut values: Vec<f64> = window.iter().map(|s| s.value).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(MetricSummary {
            count,
            avg: sum / count as f64,
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            error_rate: errors as f64 / count as f64,
        })
    }

    /// Latest sample per name and label set.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let mut latest: BTreeMap<(String, BTreeMap<String, String>), MetricSample> = BTreeMap::new();
        for queue in samples.values() {
            for sample in queue {
                let key = (sample.name.clone(), sample.labels.clone());
                match latest.get(&key) {
                    Some(existing) if existing.timestamp >= sample.timestamp => {}
                    _ => {
                        latest.insert(key, sample.clone());
                    }
                }
            }
        }
        latest.into_values().collect()
    }

    /// Drop samples older than the retention window.
    ///
    /// Returns how many were removed.
    pub fn prune(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for queue in samples.values_mut() {
            while queue.front().map(|s| s.timestamp < cutoff).unwrap_or(false) {
                queue.pop_front();
                removed += 1;
            }
        }
        samples.retain(|_, q| !q.is_empty());
        removed
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Spawn a background loop that prunes the collector every `interval`
/// until the token is cancelled.
pub fn spawn_sweeper(
    collector: Arc<MetricsCollector>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = collector.prune();
                    if removed > 0 {
                        debug!(removed, "pruned expired metric samples");
                    }
                }
            }
        }
    })
}
