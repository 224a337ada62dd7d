use crate::transport::{AttemptOutcome, AttemptStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Shared run metrics.
///
/// Counters are plain atomic increments; the error-category map and the
/// latency samples sit behind short-held locks. Latency samples are only ever
/// appended.
#[derive(Default)]
pub struct Metrics {
    successes: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    requests_sent: AtomicU64,
    retries: AtomicU64,
    errors_by_kind: Mutex<BTreeMap<String, u64>>,
    latencies: Mutex<Vec<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request about to go on the wire. Bytes are offered, not
    /// confirmed.
    pub fn record_offered(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one executed attempt.
    ///
    /// Every attempt adds a latency sample. Only a final attempt moves the
    /// success or error counter, by the number of records in the batch; a
    /// non-final attempt counts as one retry performed.
    pub fn record(&self, outcome: &AttemptOutcome) {
        lock(&self.latencies).push(outcome.elapsed);

        if !outcome.is_final {
            self.retries.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.finalize(&outcome.status, outcome.records);
    }

    /// Account a batch that failed before any attempt went out. Counts the
    /// error without a latency sample.
    pub fn record_unsent(&self, status: &AttemptStatus, records: u64) {
        self.finalize(status, records);
    }

    fn finalize(&self, status: &AttemptStatus, records: u64) {
        match status {
            AttemptStatus::Success => {
                self.successes.fetch_add(records, Ordering::Relaxed);
            }
            failure => {
                self.errors.fetch_add(records, Ordering::Relaxed);
                *lock(&self.errors_by_kind)
                    .entry(failure.label())
                    .or_insert(0) += 1;
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            latency_samples: lock(&self.latencies).len() as u64,
            errors_by_kind: lock(&self.errors_by_kind).clone(),
        }
    }

    /// Latency statistics over all samples, or over the last `window` samples.
    pub fn latency_summary(&self, window: Option<usize>) -> Option<LatencySummary> {
        let samples = {
            let all = lock(&self.latencies);
            let skip = match window {
                Some(n) => all.len().saturating_sub(n),
                None => 0,
            };
            all[skip..].to_vec()
        };
        LatencySummary::from_samples(samples, window)
    }
}

/// Point-in-time copy of the counters, cheap enough for progress lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub successes: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub requests_sent: u64,
    pub retries: u64,
    pub latency_samples: u64,
    /// Finalized failed batches per category label
    pub errors_by_kind: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Records with a final outcome, successful or not.
    pub fn accounted(&self) -> u64 {
        self.successes + self.errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    /// Set when only the last `window` samples were used
    pub window: Option<usize>,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
    /// Sample standard deviation, needs at least two samples
    pub stddev_ms: Option<f64>,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<Duration>, window: Option<usize>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let ms: Vec<f64> = samples.iter().map(|d| d.as_nanos() as f64 / 1_000_000.0).collect();
        let n = ms.len();
        let mean = ms.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            ms[n / 2]
        } else {
            (ms[n / 2 - 1] + ms[n / 2]) / 2.0
        };
        let stddev = (n > 1).then(|| {
            let var = ms.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        });

        Some(Self {
            samples: n,
            window,
            mean_ms: mean,
            min_ms: ms[0],
            max_ms: ms[n - 1],
            median_ms: median,
            stddev_ms: stddev,
            p95_ms: percentile(&ms, 0.95).unwrap_or_default(),
            p99_ms: percentile(&ms, 0.99).unwrap_or_default(),
        })
    }
}

/// Nearest-rank percentile of an ascending slice: the element at
/// `floor(p * n)`, clamped to the last element. No interpolation.
pub fn percentile<T: Copy>(sorted: &[T], p: f64) -> Option<T> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (p.clamp(0.0, 1.0) * sorted.len() as f64).floor() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}
