//! Client observability: latency histograms for network calls and counters for
//! cache hits, misses, retries and batch flushes.
//! Histograms track p50/p95/p99 over the most recent samples.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<ClientMetrics>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<ClientMetrics>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        let idx = idx.min(self.count - 1);
        sorted[idx]
    }
}

/// Histograms and counters for one client instance.
pub struct ClientMetrics {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    ring_capacity: usize,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample for the named histogram.
    pub fn record(&self, name: &'static str, value: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value);
        tracing::trace!(metric = name, value, "metric_recorded");
    }

    pub fn incr(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Get percentile for a metric (p value 0-100).
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    /// Generate a summary of all histograms at p50/p95/p99.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        let mut out = HashMap::new();
        for (&name, ring) in hists.iter() {
            out.insert(
                name.to_string(),
                MetricSummary {
                    p50: ring.percentile(50.0),
                    p95: ring.percentile(95.0),
                    p99: ring.percentile(99.0),
                    count: ring.count,
                },
            );
        }
        out
    }

    pub fn counters(&self) -> HashMap<String, u64> {
        self.counters
            .lock()
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_MISS: &str = "cache_miss";
    pub const HTTP_CALL: &str = "http_call";
    pub const RETRY: &str = "retry";
    pub const BATCH_FLUSH: &str = "batch_flush";
    /// Latency of a single translate call, in microseconds.
    pub const T_TRANSLATE_REQUEST: &str = "t_translate_request";
    /// Latency of a batch call, in microseconds.
    pub const T_BATCH_REQUEST: &str = "t_batch_request";
    /// Queued items per flushed batch.
    pub const BATCH_SIZE: &str = "batch_size";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let metrics = ClientMetrics::new();
        for v in 1..=100 {
            metrics.record(metric_names::BATCH_SIZE, v as f64);
        }
        assert_eq!(metrics.percentile(metric_names::BATCH_SIZE, 50.0), 51.0);
        assert_eq!(metrics.percentile(metric_names::BATCH_SIZE, 99.0), 99.0);
        assert_eq!(metrics.percentile("unknown", 50.0), 0.0);

        let summary = metrics.summary();
        assert_eq!(summary[metric_names::BATCH_SIZE].count, 100);
    }

    #[test]
    fn ring_keeps_only_recent_samples() {
        let mut ring = SampleRing::new(4);
        for v in [100.0, 1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        assert_eq!(ring.count, 4);
        assert_eq!(ring.percentile(100.0), 4.0);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = ClientMetrics::new();
        metrics.incr(metric_names::CACHE_HIT);
        metrics.incr(metric_names::CACHE_HIT);
        metrics.incr(metric_names::RETRY);
        assert_eq!(metrics.count(metric_names::CACHE_HIT), 2);
        assert_eq!(metrics.count(metric_names::CACHE_MISS), 0);
        assert_eq!(metrics.counters().len(), 2);
    }

    #[test]
    fn span_records_on_finish() {
        let metrics = Arc::new(ClientMetrics::new());
        let span = metrics.span(metric_names::T_TRANSLATE_REQUEST);
        span.finish();
        assert_eq!(metrics.summary()[metric_names::T_TRANSLATE_REQUEST].count, 1);
    }
}
