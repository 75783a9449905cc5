use rand::Rng;
use tracing::warn;

use plexus_config::SelectorStrategy;

use crate::metrics::MetricsCollector;
use crate::router::RouteResult;

/// Pick one candidate index under the given strategy.
///
/// The router builds the full failover ordering by calling this repeatedly
/// with the chosen candidate removed, so the strategy's preference is
/// preserved across the whole list.
pub fn select_index(
    strategy: SelectorStrategy,
    candidates: &[RouteResult],
    metrics: Option<&MetricsCollector>,
    previous_attempts: &[(String, String)],
) -> usize {
    if candidates.len() <= 1 {
        return 0;
    }
    match strategy {
        SelectorStrategy::Random => weighted_random(candidates),
        SelectorStrategy::InOrder => in_order(candidates, previous_attempts),
        SelectorStrategy::Cost => {
            by_metric(candidates, metrics, |agg| agg.avg_cost_per_1m, true)
        }
        SelectorStrategy::Latency => by_metric(
            candidates,
            metrics,
            |agg| Some(agg.avg_latency_ms),
            true,
        ),
        SelectorStrategy::Performance => by_metric(
            candidates,
            metrics,
            |agg| {
                let latency = agg.avg_latency_ms.max(1.0);
                let cost = agg.avg_cost_per_1m.unwrap_or(0.0).max(f64::EPSILON);
                let throughput = agg.avg_tokens_per_sec.unwrap_or(0.0);
                if throughput > 0.0 {
                    Some(throughput / (latency * cost))
                } else {
                    Some(1.0 / (latency * cost))
                }
            },
            false,
        ),
    }
}

/// Cumulative-weight lookup against a uniform draw in `[0, total)`.
/// Unweighted candidates count as weight 1; an all-zero list degrades to a
/// uniform pick.
fn weighted_random(candidates: &[RouteResult]) -> usize {
    let weights: Vec<u64> = candidates
        .iter()
        .map(|c| u64::from(c.weight.unwrap_or(1)))
        .collect();
    let total: u64 = weights.iter().sum();
    if total == 0 {
        return rand::rng().random_range(0..candidates.len());
    }
    let mut roll = rand::rng().random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        if roll < *weight {
            return index;
        }
        roll -= weight;
    }
    candidates.len() - 1
}

/// First candidate not yet attempted; when everything was attempted,
/// start over from the front.
fn in_order(candidates: &[RouteResult], previous_attempts: &[(String, String)]) -> usize {
    candidates
        .iter()
        .position(|c| {
            !previous_attempts
                .iter()
                .any(|(p, m)| *p == c.provider && *m == c.model)
        })
        .unwrap_or(0)
}

/// Lowest (or highest) metric wins; ties break on input order. When no
/// candidate has data the strategy degrades to weighted random.
fn by_metric(
    candidates: &[RouteResult],
    metrics: Option<&MetricsCollector>,
    value: impl Fn(&crate::metrics::ProviderAggregates) -> Option<f64>,
    lower_is_better: bool,
) -> usize {
    let Some(collector) = metrics else {
        return weighted_random(candidates);
    };
    let scored: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            collector
                .aggregates(&candidate.provider)
                .and_then(|agg| value(&agg))
                .map(|v| (index, v))
        })
        .collect();
    if scored.is_empty() {
        warn!(
            event = "selector_no_metrics",
            "no metrics for any candidate, falling back to random"
        );
        return weighted_random(candidates);
    }
    let mut best = scored[0];
    for entry in &scored[1..] {
        let better = if lower_is_better {
            entry.1 < best.1
        } else {
            entry.1 > best.1
        };
        if better {
            best = *entry;
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestMetrics;

    fn candidate(provider: &str, model: &str, weight: Option<u32>) -> RouteResult {
        RouteResult {
            alias: None,
            provider: provider.to_string(),
            model: model.to_string(),
            weight,
        }
    }

    #[test]
    fn in_order_skips_attempted() {
        let candidates = vec![
            candidate("a", "m", None),
            candidate("b", "m", None),
            candidate("c", "m", None),
        ];
        let attempted = vec![("a".to_string(), "m".to_string())];
        assert_eq!(
            select_index(SelectorStrategy::InOrder, &candidates, None, &attempted),
            1
        );
        // Everything attempted: wrap to the front.
        let all = vec![
            ("a".to_string(), "m".to_string()),
            ("b".to_string(), "m".to_string()),
            ("c".to_string(), "m".to_string()),
        ];
        assert_eq!(
            select_index(SelectorStrategy::InOrder, &candidates, None, &all),
            0
        );
    }

    #[test]
    fn weighted_random_respects_weights_in_aggregate() {
        let candidates = vec![candidate("a", "m", Some(0)), candidate("b", "m", Some(5))];
        // Weight 0 vs 5: candidate b must always win.
        for _ in 0..50 {
            assert_eq!(
                select_index(SelectorStrategy::Random, &candidates, None, &[]),
                1
            );
        }
    }

    #[test]
    fn weighted_random_distribution_is_roughly_proportional() {
        let candidates = vec![candidate("a", "m", Some(1)), candidate("b", "m", Some(3))];
        let mut counts = [0usize; 2];
        for _ in 0..4000 {
            counts[select_index(SelectorStrategy::Random, &candidates, None, &[])] += 1;
        }
        let share = counts[1] as f64 / 4000.0;
        assert!(share > 0.65 && share < 0.85, "share was {share}");
    }

    #[test]
    fn latency_picks_fastest_provider() {
        let collector = MetricsCollector::new(10);
        for (provider, latency) in [("slow", 900), ("fast", 80)] {
            collector.record(RequestMetrics {
                provider: provider.to_string(),
                timestamp_ms: crate::now_ms(),
                success: true,
                latency_ms: latency,
                ttft_ms: None,
                tokens_per_sec: None,
                cost_per_1m: None,
            });
        }
        let candidates = vec![candidate("slow", "m", None), candidate("fast", "m", None)];
        assert_eq!(
            select_index(SelectorStrategy::Latency, &candidates, Some(&collector), &[]),
            1
        );
    }

    #[test]
    fn cost_without_metrics_falls_back_to_random() {
        let collector = MetricsCollector::new(10);
        let candidates = vec![candidate("a", "m", None), candidate("b", "m", None)];
        // No metrics recorded: must not panic, returns some valid index.
        let index = select_index(SelectorStrategy::Cost, &candidates, Some(&collector), &[]);
        assert!(index < 2);
    }

    #[test]
    fn performance_prefers_throughput_per_dollar() {
        let collector = MetricsCollector::new(10);
        let mut cheap_fast = RequestMetrics {
            provider: "good".to_string(),
            timestamp_ms: crate::now_ms(),
            success: true,
            latency_ms: 100,
            ttft_ms: None,
            tokens_per_sec: Some(90.0),
            cost_per_1m: Some(1.0),
        };
        collector.record(cheap_fast.clone());
        cheap_fast.provider = "bad".to_string();
        cheap_fast.latency_ms = 100;
        cheap_fast.tokens_per_sec = Some(90.0);
        cheap_fast.cost_per_1m = Some(50.0);
        collector.record(cheap_fast);

        let candidates = vec![candidate("bad", "m", None), candidate("good", "m", None)];
        assert_eq!(
            select_index(
                SelectorStrategy::Performance,
                &candidates,
                Some(&collector),
                &[]
            ),
            1
        );
    }
}
