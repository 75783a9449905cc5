//! Target selection: cooldowns, selectors, metrics, cost, and the router.
//!
//! Everything here is constructed explicitly and injected; nothing is a
//! process global. A request captures one config snapshot and runs against
//! the shared cooldown/metrics state owned by the engine.

mod classify;
mod cooldown;
mod cost;
mod metrics;
mod ratelimit;
mod router;
mod selector;

pub use classify::{Classification, Classifier, ComplexityTier, HeuristicClassifier};
pub use cooldown::{CooldownManager, CooldownSnapshotEntry};
pub use cost::{CostBreakdown, CostCalculator, CostSource};
pub use metrics::{MetricsCollector, ProviderAggregates, RequestMetrics};
pub use ratelimit::{
    RateLimitParser, RateLimitParserRegistry, ResetAfterParser, parse_retry_after,
};
pub use router::{RouteError, RouteResult, Router};
pub use selector::select_index;

/// Unix milliseconds now; the single clock used for cooldown expiries so
/// persisted rows stay comparable across restarts.
pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
