use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::now_ms;

/// One request's worth of observations for a provider.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub provider: String,
    pub timestamp_ms: i64,
    pub success: bool,
    pub latency_ms: u64,
    pub ttft_ms: Option<u64>,
    pub tokens_per_sec: Option<f64>,
    pub cost_per_1m: Option<f64>,
}

/// Aggregates recomputed on read over the rolling window.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAggregates {
    pub request_count: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    /// Only over records that carried a TTFT.
    pub avg_ttft_ms: Option<f64>,
    pub avg_tokens_per_sec: Option<f64>,
    pub avg_cost_per_1m: Option<f64>,
}

/// Append-only per-provider ring trimmed to the last `window_minutes`.
pub struct MetricsCollector {
    window_ms: i64,
    rings: Mutex<HashMap<String, VecDeque<RequestMetrics>>>,
}

impl MetricsCollector {
    pub fn new(window_minutes: u64) -> Self {
        Self {
            window_ms: (window_minutes * 60_000) as i64,
            rings: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, metrics: RequestMetrics) {
        let cutoff = now_ms() - self.window_ms;
        let mut guard = self.lock();
        let ring = guard.entry(metrics.provider.clone()).or_default();
        ring.push_back(metrics);
        while ring.front().is_some_and(|m| m.timestamp_ms < cutoff) {
            ring.pop_front();
        }
    }

    /// Aggregates for one provider; `None` when no recent records exist.
    pub fn aggregates(&self, provider: &str) -> Option<ProviderAggregates> {
        let cutoff = now_ms() - self.window_ms;
        let mut guard = self.lock();
        let ring = guard.get_mut(provider)?;
        while ring.front().is_some_and(|m| m.timestamp_ms < cutoff) {
            ring.pop_front();
        }
        if ring.is_empty() {
            guard.remove(provider);
            return None;
        }
        Some(compute(ring))
    }

    /// All providers with recent data; expired providers are dropped.
    pub fn all(&self) -> HashMap<String, ProviderAggregates> {
        let cutoff = now_ms() - self.window_ms;
        let mut guard = self.lock();
        let mut out = HashMap::new();
        guard.retain(|provider, ring| {
            while ring.front().is_some_and(|m| m.timestamp_ms < cutoff) {
                ring.pop_front();
            }
            if ring.is_empty() {
                return false;
            }
            out.insert(provider.clone(), compute(ring));
            true
        });
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<RequestMetrics>>> {
        match self.rings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn compute(ring: &VecDeque<RequestMetrics>) -> ProviderAggregates {
    let count = ring.len();
    let successes = ring.iter().filter(|m| m.success).count();

    let mut latencies: Vec<u64> = ring.iter().map(|m| m.latency_ms).collect();
    latencies.sort_unstable();
    let avg_latency = latencies.iter().sum::<u64>() as f64 / count as f64;

    let ttfts: Vec<u64> = ring.iter().filter_map(|m| m.ttft_ms).collect();
    let throughputs: Vec<f64> = ring.iter().filter_map(|m| m.tokens_per_sec).collect();
    let costs: Vec<f64> = ring.iter().filter_map(|m| m.cost_per_1m).collect();

    ProviderAggregates {
        request_count: count,
        success_rate: successes as f64 / count as f64,
        avg_latency_ms: avg_latency,
        p50_latency_ms: percentile(&latencies, 50),
        p95_latency_ms: percentile(&latencies, 95),
        avg_ttft_ms: mean(&ttfts.iter().map(|&v| v as f64).collect::<Vec<_>>()),
        avg_tokens_per_sec: mean(&throughputs),
        avg_cost_per_1m: mean(&costs),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, latency_ms: u64, success: bool) -> RequestMetrics {
        RequestMetrics {
            provider: provider.to_string(),
            timestamp_ms: crate::now_ms(),
            success,
            latency_ms,
            ttft_ms: None,
            tokens_per_sec: None,
            cost_per_1m: None,
        }
    }

    #[test]
    fn aggregates_basic() {
        let collector = MetricsCollector::new(10);
        for latency in [100, 200, 300, 400] {
            collector.record(record("p", latency, true));
        }
        collector.record(record("p", 500, false));
        let agg = collector.aggregates("p").unwrap();
        assert_eq!(agg.request_count, 5);
        assert_eq!(agg.success_rate, 0.8);
        assert_eq!(agg.avg_latency_ms, 300.0);
        assert_eq!(agg.p50_latency_ms, 300);
        assert_eq!(agg.p95_latency_ms, 500);
        assert_eq!(agg.avg_ttft_ms, None);
    }

    #[test]
    fn ttft_averages_only_present_records() {
        let collector = MetricsCollector::new(10);
        let mut with_ttft = record("p", 100, true);
        with_ttft.ttft_ms = Some(40);
        collector.record(with_ttft);
        collector.record(record("p", 100, true));
        let agg = collector.aggregates("p").unwrap();
        assert_eq!(agg.avg_ttft_ms, Some(40.0));
    }

    #[test]
    fn expired_records_age_out() {
        let collector = MetricsCollector::new(1);
        let mut stale = record("p", 100, true);
        stale.timestamp_ms -= 2 * 60_000;
        collector.record(stale);
        assert!(collector.aggregates("p").is_none());
        assert!(collector.all().is_empty());
    }

    #[test]
    fn unknown_provider_is_none() {
        let collector = MetricsCollector::new(10);
        assert!(collector.aggregates("ghost").is_none());
    }
}
