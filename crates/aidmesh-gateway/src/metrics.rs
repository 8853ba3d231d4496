//! Gateway metrics: named counters plus bounded time series.
//!
//! Counters are monotone or last-value gauges; series keep the most recent
//! 1024 samples each behind their own lock. Readers always get copies.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Samples retained per series.
pub const SERIES_CAP: usize = 1024;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One time-series sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub value: f64,
}

#[derive(Default)]
struct BoundedSeries {
    samples: VecDeque<Sample>,
}

impl BoundedSeries {
    fn push(&mut self, value: f64) {
        if self.samples.len() == SERIES_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            timestamp_ms: now_ms(),
            value,
        });
    }
}

/// Process-wide metrics registry. One per gateway, passed through context.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, u64>>,
    series: RwLock<BTreeMap<String, Arc<Mutex<BoundedSeries>>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to a counter.
    pub fn incr(&self, name: &str, by: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += by;
    }

    /// Overwrite a gauge-style counter.
    pub fn set(&self, name: &str, value: u64) {
        self.counters.write().insert(name.to_string(), value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// Copy of every counter.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.read().clone()
    }

    /// Append one sample to a named series.
    pub fn record(&self, name: &str, value: f64) {
        let series = {
            let read = self.series.read();
            read.get(name).cloned()
        };
        let series = match series {
            Some(series) => series,
            None => self
                .series
                .write()
                .entry(name.to_string())
                .or_default()
                .clone(),
        };
        series.lock().push(value);
    }

    /// The most recent `limit` samples of a series, newest last.
    pub fn series(&self, name: &str, limit: usize) -> Vec<Sample> {
        let series = {
            let read = self.series.read();
            read.get(name).cloned()
        };
        match series {
            Some(series) => {
                let guard = series.lock();
                let skip = guard.samples.len().saturating_sub(limit);
                guard.samples.iter().skip(skip).copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn series_names(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }
}
