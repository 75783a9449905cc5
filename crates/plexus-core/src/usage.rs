use std::sync::Arc;

use tracing::error;

use plexus_common::RequestContext;
use plexus_routing::{CostCalculator, RequestMetrics};
use plexus_storage::{ErrorLogEntry, Event, EventBus, UsageLogEntry, UsageStore};
use plexus_transform::CompletedResponse;

use crate::error::RoutingContext;
use crate::now_ms;

/// Writes per-request usage and error rows, computes derived throughput
/// figures, and emits events. Writes are best-effort: a store failure is
/// logged and never affects the request outcome.
pub struct UsageLogger {
    store: Option<Arc<dyn UsageStore>>,
    events: EventBus,
    cost: CostCalculator,
}

impl UsageLogger {
    pub fn new(store: Option<Arc<dyn UsageStore>>, events: EventBus, cost: CostCalculator) -> Self {
        Self {
            store,
            events,
            cost,
        }
    }

    /// Zero-token `pending` row at stream start; finalized later under the
    /// same request id.
    pub async fn log_pending(&self, ctx: &RequestContext) {
        let entry = self.base_entry(ctx, true);
        if let Some(store) = &self.store {
            if let Err(err) = store.insert_usage(&entry).await {
                error!(event = "usage_write_failed", request_id = %ctx.id, error = %err);
            }
        }
    }

    /// Final row for a completed request. Returns the metrics record so
    /// the dispatcher can feed the collector without recomputing cost.
    pub async fn log_completion(
        &self,
        ctx: &RequestContext,
        response: &CompletedResponse,
        finalize: bool,
    ) -> RequestMetrics {
        let mut entry = self.base_entry(ctx, false);
        let provider = entry.provider.clone();

        let elapsed_ms = ctx.start.elapsed().as_millis() as u64;
        entry.latency_ms = elapsed_ms;
        entry.input_tokens = response.usage.input_tokens;
        entry.output_tokens = response.usage.output_tokens;
        entry.cached_tokens = response.usage.cached_tokens;
        entry.reasoning_tokens = response.usage.reasoning_tokens;
        entry.provider_ttft_ms = ctx.provider_ttft_ms();
        entry.client_ttft_ms = ctx.client_ttft_ms();
        entry.transformation_overhead_ms = ctx.transformation_overhead_ms();
        entry.provider_tokens_per_second =
            tokens_per_second(response.usage.output_tokens, elapsed_ms, entry.provider_ttft_ms);
        entry.client_tokens_per_second =
            tokens_per_second(response.usage.output_tokens, elapsed_ms, entry.client_ttft_ms);

        let breakdown = self.cost.compute(&provider, &entry.model, &response.usage);
        entry.cost = Some(breakdown.total);
        entry.cost_source = Some(breakdown.source.as_str().to_string());

        if let Some(store) = &self.store {
            let result = if finalize {
                store.finalize_usage(&entry).await
            } else {
                store.insert_usage(&entry).await
            };
            if let Err(err) = result {
                error!(event = "usage_write_failed", request_id = %ctx.id, error = %err);
            }
        }
        self.events.emit(Event::Usage(entry.clone())).await;

        RequestMetrics {
            provider,
            timestamp_ms: now_ms(),
            success: true,
            latency_ms: elapsed_ms,
            ttft_ms: entry.provider_ttft_ms,
            tokens_per_sec: entry.provider_tokens_per_second,
            cost_per_1m: Some(breakdown.per_1m_tokens),
        }
    }

    pub async fn log_error(
        &self,
        ctx: &RequestContext,
        kind: &str,
        message: &str,
        routing: Option<&RoutingContext>,
    ) {
        let entry = ErrorLogEntry {
            request_id: ctx.id.clone(),
            timestamp_ms: now_ms(),
            alias: ctx.alias_used.clone(),
            provider: routing
                .map(|r| r.provider.clone())
                .or_else(|| ctx.actual_provider.clone()),
            model: routing
                .map(|r| r.target_model.clone())
                .or_else(|| ctx.actual_model.clone()),
            status_code: routing.and_then(|r| r.status_code),
            error_kind: kind.to_string(),
            message: message.to_string(),
            attempt_count: routing.map(|r| r.attempt_count).unwrap_or(0),
            attempted_targets: routing
                .map(|r| r.all_attempted_providers.clone())
                .unwrap_or_default(),
        };
        if let Some(store) = &self.store {
            if let Err(err) = store.insert_error(&entry).await {
                error!(event = "error_write_failed", request_id = %ctx.id, error = %err);
            }
        }
        self.events.emit(Event::InferenceError(entry)).await;
    }

    fn base_entry(&self, ctx: &RequestContext, pending: bool) -> UsageLogEntry {
        UsageLogEntry {
            request_id: ctx.id.clone(),
            timestamp_ms: (ctx.started_at.unix_timestamp_nanos() / 1_000_000) as i64,
            api_key_name: ctx.api_key_name.clone(),
            client_ip: ctx.client_ip.clone(),
            client_api_type: ctx.client_api_type.as_str().to_string(),
            alias: ctx.alias_used.clone(),
            provider: ctx.actual_provider.clone().unwrap_or_default(),
            model: ctx.actual_model.clone().unwrap_or_default(),
            target_api_type: ctx
                .target_api_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            streaming: ctx.streaming,
            passthrough: ctx.passthrough,
            pending,
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: None,
            reasoning_tokens: None,
            latency_ms: 0,
            provider_ttft_ms: None,
            client_ttft_ms: None,
            transformation_overhead_ms: None,
            provider_tokens_per_second: None,
            client_tokens_per_second: None,
            cost: None,
            cost_source: None,
        }
    }
}

/// Output tokens over the generation window (total minus TTFT). Falls back
/// to the whole elapsed window when no first-token time was recorded.
fn tokens_per_second(output_tokens: u64, elapsed_ms: u64, ttft_ms: Option<u64>) -> Option<f64> {
    if output_tokens == 0 {
        return None;
    }
    let window_ms = elapsed_ms.saturating_sub(ttft_ms.unwrap_or(0)).max(1);
    Some(output_tokens as f64 / (window_ms as f64 / 1_000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_common::ApiType;
    use plexus_config::{ConfigHandle, ConfigSnapshot};
    use plexus_storage::MemoryStore;
    use plexus_transform::{FinishReason, TokenUsage};

    fn logger(store: Arc<MemoryStore>) -> UsageLogger {
        UsageLogger::new(
            Some(store),
            EventBus::new(8),
            CostCalculator::new(ConfigHandle::new(ConfigSnapshot::default())),
        )
    }

    fn response(input: u64, output: u64) -> CompletedResponse {
        CompletedResponse {
            id: "r".into(),
            model: "m".into(),
            parts: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                input_tokens: input,
                output_tokens: output,
                cached_tokens: None,
                reasoning_tokens: None,
            },
            warnings: Vec::new(),
            plexus: None,
        }
    }

    #[tokio::test]
    async fn pending_then_finalize_rewrites_row() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger(store.clone());
        let mut ctx = RequestContext::new(ApiType::Chat);
        ctx.streaming = true;
        ctx.actual_provider = Some("p".into());
        ctx.actual_model = Some("m".into());
        ctx.target_api_type = Some(ApiType::Chat);

        logger.log_pending(&ctx).await;
        let row = store.usage_row(&ctx.id).await.unwrap();
        assert!(row.pending);
        assert_eq!(row.output_tokens, 0);

        logger.log_completion(&ctx, &response(10, 20), true).await;
        let row = store.usage_row(&ctx.id).await.unwrap();
        assert!(!row.pending);
        assert_eq!(row.input_tokens, 10);
        assert_eq!(row.output_tokens, 20);
        assert!(row.cost.is_some());
    }

    #[tokio::test]
    async fn error_rows_capture_attempts() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger(store.clone());
        let ctx = RequestContext::new(ApiType::Chat);
        let routing = RoutingContext {
            provider: "p".into(),
            target_model: "m".into(),
            target_api_type: ApiType::Chat,
            url: "https://u".into(),
            sanitized_headers: Vec::new(),
            status_code: Some(500),
            provider_response: Some("boom".into()),
            attempt_count: 2,
            all_attempted_providers: vec!["a/m".into(), "p/m".into()],
        };
        logger
            .log_error(&ctx, "api_error", "all failed", Some(&routing))
            .await;
        let rows = store.error_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempt_count, 2);
        assert_eq!(rows[0].attempted_targets.len(), 2);
    }

    #[test]
    fn tokens_per_second_windows() {
        assert_eq!(tokens_per_second(0, 1000, None), None);
        let tps = tokens_per_second(100, 2_000, Some(1_000)).unwrap();
        assert!((tps - 100.0).abs() < 1e-9);
    }
}
