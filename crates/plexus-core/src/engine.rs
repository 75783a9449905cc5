use std::sync::Arc;

use plexus_common::{ApiType, RequestContext};
use plexus_config::ConfigHandle;
use plexus_routing::{
    CooldownManager, CostCalculator, MetricsCollector, RateLimitParserRegistry, Router,
};
use plexus_storage::{CooldownStore, EventBus, UsageStore};
use plexus_transform::{TransformerRegistry, UnifiedRequest};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::DispatchError;
use crate::upstream::UpstreamClient;
use crate::usage::UsageLogger;

/// Construction-time knobs and optional persistence backends.
pub struct EngineOptions {
    pub cooldown_store: Option<Arc<dyn CooldownStore>>,
    pub usage_store: Option<Arc<dyn UsageStore>>,
    pub metrics_window_minutes: u64,
    pub event_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cooldown_store: None,
            usage_store: None,
            metrics_window_minutes: 60,
            event_buffer: 256,
        }
    }
}

/// Top-level application object owning every data-plane service.
///
/// Services are plain injected values (no globals); tests construct a fresh
/// engine per case with whatever stores and upstream client they need.
pub struct Engine {
    config: ConfigHandle,
    transformers: TransformerRegistry,
    cooldowns: Arc<CooldownManager>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    dispatcher: Dispatcher,
}

impl Engine {
    pub async fn new(
        config: ConfigHandle,
        client: Arc<dyn UpstreamClient>,
        options: EngineOptions,
    ) -> Self {
        let events = EventBus::new(options.event_buffer);
        let cooldowns = Arc::new(CooldownManager::new(
            config.clone(),
            options.cooldown_store,
            events.clone(),
        ));
        cooldowns.restore().await;

        let metrics = Arc::new(MetricsCollector::new(options.metrics_window_minutes));
        let router = Arc::new(Router::new(
            config.clone(),
            cooldowns.clone(),
            metrics.clone(),
        ));
        let usage = Arc::new(UsageLogger::new(
            options.usage_store,
            events.clone(),
            CostCalculator::new(config.clone()),
        ));
        let transformers = TransformerRegistry::builtin();
        let dispatcher = Dispatcher::new(
            config.clone(),
            router,
            cooldowns.clone(),
            metrics.clone(),
            transformers.clone(),
            RateLimitParserRegistry::new(),
            client,
            usage,
        );

        Self {
            config,
            transformers,
            cooldowns,
            metrics,
            events,
            dispatcher,
        }
    }

    /// Parse raw client bytes in the given dialect.
    pub fn parse_request(
        &self,
        api_type: ApiType,
        raw: &[u8],
    ) -> Result<UnifiedRequest, DispatchError> {
        let transformer = self
            .transformers
            .get(api_type)
            .ok_or_else(|| DispatchError::Internal(format!("no transformer for {api_type}")))?;
        Ok(transformer.parse_request(raw)?)
    }

    pub async fn dispatch(
        &self,
        unified: UnifiedRequest,
        ctx: RequestContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(unified, ctx).await
    }

    /// Parse-then-dispatch convenience for callers with no per-dialect
    /// fixups to apply.
    pub async fn handle(
        &self,
        api_type: ApiType,
        raw: &[u8],
        ctx: RequestContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let unified = self.parse_request(api_type, raw)?;
        self.dispatch(unified, ctx).await
    }

    /// Relay an opaque body (multipart transcription upload) with routing
    /// and failover but no transformation.
    pub async fn relay_opaque(
        &self,
        api_type: ApiType,
        model: &str,
        body: bytes::Bytes,
        content_type: &str,
        ctx: RequestContext,
        rewrite: &(dyn Fn(&bytes::Bytes, &str) -> bytes::Bytes + Send + Sync),
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .relay_opaque(api_type, model, body, content_type, ctx, rewrite)
            .await
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn cooldowns(&self) -> &Arc<CooldownManager> {
        &self.cooldowns
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
