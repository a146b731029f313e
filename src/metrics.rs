//! In-process timing metrics
//!
//! Keeps the most recent samples per operation and reduces them on demand.
//! Nothing here is persisted or used to make decisions.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Samples kept per operation by default
pub const DEFAULT_CAPACITY: usize = 100;

/// Reduced view of one operation's samples, in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl MetricSummary {
    fn from_samples(samples: &VecDeque<Duration>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        secs.sort_by(f64::total_cmp);

        let count = secs.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (secs[mid - 1] + secs[mid]) / 2.0
        } else {
            secs[mid]
        };

        Some(Self {
            count,
            average: secs.iter().sum::<f64>() / count as f64,
            min: secs[0],
            max: secs[count - 1],
            median,
        })
    }
}

/// Bounded per-operation duration samples
#[derive(Debug)]
pub struct PerformanceMetrics {
    capacity: usize,
    samples: Mutex<HashMap<String, VecDeque<Duration>>>,
}

impl PerformanceMetrics {
    /// Keep at most `capacity` samples per operation
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    // A panic while holding the lock cannot leave the map inconsistent
    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Duration>>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one sample, dropping the oldest when full
    pub fn record(&self, name: &str, duration: Duration) {
        let mut samples = self.lock();
        let series = samples
            .entry(name.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if series.len() == self.capacity {
            series.pop_front();
        }
        series.push_back(duration);
    }

    /// Summary of every operation seen so far
    pub fn summarize(&self) -> BTreeMap<String, MetricSummary> {
        self.lock()
            .iter()
            .filter_map(|(name, series)| {
                MetricSummary::from_samples(series).map(|summary| (name.clone(), summary))
            })
            .collect()
    }

    /// Summary of a single operation
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        self.lock().get(name).and_then(MetricSummary::from_samples)
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
