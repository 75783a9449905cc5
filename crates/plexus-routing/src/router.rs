use std::sync::Arc;

use tracing::{debug, warn};

use plexus_common::ApiType;
use plexus_config::{ConfigHandle, ConfigSnapshot, ModelAlias, SelectorStrategy};
use plexus_transform::UnifiedRequest;

use crate::classify::{Classifier, ComplexityTier, HeuristicClassifier};
use crate::cooldown::CooldownManager;
use crate::metrics::MetricsCollector;
use crate::selector::select_index;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("unknown model alias: {0}")]
    AliasNotFound(String),
    #[error("all targets of `{0}` are disabled")]
    AllDisabled(String),
    #[error("all targets of `{0}` are cooling down")]
    AllOnCooldown(String),
    #[error("no target of `{0}` speaks a compatible api type")]
    NoCompatibleTarget(String),
    #[error("unknown provider: {0}")]
    ProviderNotFound(String),
    #[error("provider `{0}` is disabled")]
    ProviderDisabled(String),
    #[error("`auto` routing is not configured")]
    AutoNotConfigured,
}

/// One concrete routed target, in failover order.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    /// Canonical alias the name resolved through; `None` for direct routes.
    pub alias: Option<String>,
    pub provider: String,
    pub model: String,
    pub weight: Option<u32>,
}

/// Resolves a client-facing model name to an ordered candidate list.
pub struct Router {
    config: ConfigHandle,
    cooldowns: Arc<CooldownManager>,
    metrics: Arc<MetricsCollector>,
    classifier: Arc<dyn Classifier>,
}

impl Router {
    pub fn new(
        config: ConfigHandle,
        cooldowns: Arc<CooldownManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            cooldowns,
            metrics,
            classifier: Arc::new(HeuristicClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Thin wrapper over [`Router::resolve_candidates`] returning the first
    /// candidate.
    pub async fn resolve(
        &self,
        model_name: &str,
        incoming_api_type: Option<ApiType>,
        request: Option<&UnifiedRequest>,
    ) -> Result<RouteResult, RouteError> {
        let mut candidates = self
            .resolve_candidates(model_name, incoming_api_type, request)
            .await?;
        Ok(candidates.remove(0))
    }

    /// Expand the alias, filter to healthy compatible targets, and order
    /// by the alias's selector strategy. Never returns an empty list.
    pub async fn resolve_candidates(
        &self,
        model_name: &str,
        incoming_api_type: Option<ApiType>,
        request: Option<&UnifiedRequest>,
    ) -> Result<Vec<RouteResult>, RouteError> {
        let snapshot = self.config.snapshot();

        if let Some(rest) = model_name.strip_prefix("direct/") {
            return self.resolve_direct(&snapshot, rest);
        }

        if model_name == "auto" && snapshot.auto.as_ref().is_some_and(|a| a.enabled) {
            let tier_alias = self.auto_tier_alias(&snapshot, request)?;
            debug!(event = "auto_routed", alias = %tier_alias);
            return Box::pin(self.resolve_candidates(&tier_alias, incoming_api_type, request))
                .await;
        }

        let (canonical, alias) = snapshot
            .alias(model_name)
            .ok_or_else(|| RouteError::AliasNotFound(model_name.to_string()))?;
        let canonical = canonical.to_string();

        // Enabled targets of enabled providers only.
        let enabled: Vec<RouteResult> = alias
            .targets
            .iter()
            .filter(|target| target.enabled)
            .filter(|target| {
                snapshot
                    .provider(&target.provider)
                    .map(|p| p.enabled)
                    .unwrap_or(false)
            })
            .map(|target| RouteResult {
                alias: Some(canonical.clone()),
                provider: target.provider.clone(),
                model: target.model.clone(),
                weight: target.weight,
            })
            .collect();
        if enabled.is_empty() {
            return Err(RouteError::AllDisabled(canonical));
        }

        let healthy = self
            .cooldowns
            .filter_healthy(enabled, |t| (t.provider.as_str(), t.model.as_str()))
            .await;
        if healthy.is_empty() {
            return Err(RouteError::AllOnCooldown(canonical));
        }

        let narrowed = narrow_candidates(&snapshot, alias, healthy, incoming_api_type, &canonical)?;

        Ok(order_by_selector(
            alias.strategy_or_warn(&canonical),
            narrowed,
            &self.metrics,
        ))
    }

    fn resolve_direct(
        &self,
        snapshot: &ConfigSnapshot,
        rest: &str,
    ) -> Result<Vec<RouteResult>, RouteError> {
        let (provider_name, model) = rest
            .split_once('/')
            .ok_or_else(|| RouteError::AliasNotFound(format!("direct/{rest}")))?;
        let provider = snapshot
            .provider(provider_name)
            .ok_or_else(|| RouteError::ProviderNotFound(provider_name.to_string()))?;
        if !provider.enabled {
            return Err(RouteError::ProviderDisabled(provider_name.to_string()));
        }
        Ok(vec![RouteResult {
            alias: None,
            provider: provider_name.to_string(),
            model: model.to_string(),
            weight: None,
        }])
    }

    fn auto_tier_alias(
        &self,
        snapshot: &ConfigSnapshot,
        request: Option<&UnifiedRequest>,
    ) -> Result<String, RouteError> {
        let auto = snapshot
            .auto
            .as_ref()
            .filter(|a| a.enabled)
            .ok_or(RouteError::AutoNotConfigured)?;

        let tier = match request {
            Some(request) => {
                let classified = self.classifier.classify(request);
                let mut tier = classified.tier;
                if classified.agentic_score > auto.agentic_boost_threshold {
                    tier = tier.promoted();
                    debug!(
                        event = "agentic_boost",
                        agentic_score = classified.agentic_score,
                        tier = ?tier
                    );
                }
                tier
            }
            None => ComplexityTier::Medium,
        };

        let alias = match tier {
            ComplexityTier::Heartbeat => &auto.tier_models.heartbeat,
            ComplexityTier::Simple => &auto.tier_models.simple,
            ComplexityTier::Medium => &auto.tier_models.medium,
            ComplexityTier::Complex => &auto.tier_models.complex,
            ComplexityTier::Reasoning => &auto.tier_models.reasoning,
        };
        Ok(alias.clone())
    }
}

trait StrategyOrWarn {
    fn strategy_or_warn(&self, alias: &str) -> SelectorStrategy;
}

impl StrategyOrWarn for ModelAlias {
    fn strategy_or_warn(&self, alias: &str) -> SelectorStrategy {
        match self.selector.as_deref() {
            None => SelectorStrategy::Random,
            Some(name) => match SelectorStrategy::parse(name) {
                Some(strategy) => strategy,
                None => {
                    warn!(
                        event = "unknown_selector",
                        alias, selector = name, "falling back to random"
                    );
                    SelectorStrategy::Random
                }
            },
        }
    }
}

/// Embeddings and `api_match` narrowing. A narrowing that would empty the
/// list is skipped with a warning rather than failing the request.
fn narrow_candidates(
    snapshot: &ConfigSnapshot,
    alias: &ModelAlias,
    candidates: Vec<RouteResult>,
    incoming_api_type: Option<ApiType>,
    canonical: &str,
) -> Result<Vec<RouteResult>, RouteError> {
    let mut candidates = candidates;

    let embeddings_wanted =
        incoming_api_type == Some(ApiType::Embeddings) || alias.kind.as_deref() == Some("embeddings");
    if embeddings_wanted {
        let narrowed: Vec<RouteResult> = candidates
            .iter()
            .filter(|c| {
                snapshot
                    .provider(&c.provider)
                    .and_then(|p| p.model(&c.model))
                    .map(|m| m.is_embeddings())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if narrowed.is_empty() {
            warn!(
                event = "embeddings_narrowing_empty",
                alias = canonical,
                "keeping unnarrowed candidates"
            );
        } else {
            candidates = narrowed;
        }
    }

    if alias.api_match_priority() {
        if let Some(api_type) = incoming_api_type {
            let narrowed: Vec<RouteResult> = candidates
                .iter()
                .filter(|c| target_supports(snapshot, c, api_type))
                .cloned()
                .collect();
            if narrowed.is_empty() {
                warn!(
                    event = "api_match_narrowing_empty",
                    alias = canonical,
                    api_type = %api_type,
                    "keeping unnarrowed candidates"
                );
            } else {
                candidates = narrowed;
            }
        }
    }

    if candidates.is_empty() {
        return Err(RouteError::NoCompatibleTarget(canonical.to_string()));
    }
    Ok(candidates)
}

/// Whether the target can serve the api type: explicit `access_via` on the
/// model wins, else types inferred from the provider's url map; a bare
/// string url is dialect-agnostic and matches anything.
fn target_supports(snapshot: &ConfigSnapshot, target: &RouteResult, api_type: ApiType) -> bool {
    let Some(provider) = snapshot.provider(&target.provider) else {
        return false;
    };
    if let Some(model) = provider.model(&target.model) {
        if let Some(access_via) = model.access_via.as_ref().filter(|v| !v.is_empty()) {
            return access_via.contains(&api_type);
        }
    }
    let inferred = provider.inferred_api_types();
    inferred.is_empty() || inferred.contains(&api_type)
}

/// Repeated selection with removal: the selector's preferred ordering is
/// preserved across the entire list for failover.
fn order_by_selector(
    strategy: SelectorStrategy,
    mut pool: Vec<RouteResult>,
    metrics: &MetricsCollector,
) -> Vec<RouteResult> {
    let mut ordered = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let index = select_index(strategy, &pool, Some(metrics), &[]);
        ordered.push(pool.remove(index));
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_storage::EventBus;

    const YAML: &str = r#"
providers:
  alpha:
    api_base_url: { chat: "https://alpha.example/v1" }
  beta:
    api_base_url: { messages: "https://beta.example" }
  gamma:
    api_base_url: https://gamma.example/v1
    enabled: false
models:
  default:
    selector: in_order
    targets:
      - { provider: alpha, model: a-1 }
      - { provider: beta, model: b-1 }
      - { provider: gamma, model: g-1 }
  matched:
    selector: in_order
    priority: api_match
    targets:
      - { provider: alpha, model: a-1 }
      - { provider: beta, model: b-1 }
auto:
  enabled: true
  tier_models:
    heartbeat: default
    simple: default
    medium: default
    complex: default
    reasoning: default
"#;

    fn router_for(yaml: &str) -> Router {
        let config = ConfigHandle::new(plexus_config::ConfigSnapshot::from_yaml(yaml).unwrap());
        let cooldowns = Arc::new(CooldownManager::new(config.clone(), None, EventBus::new(8)));
        let metrics = Arc::new(MetricsCollector::new(10));
        Router::new(config, cooldowns, metrics)
    }

    #[tokio::test]
    async fn in_order_preserves_config_order_and_drops_disabled() {
        let router = router_for(YAML);
        let candidates = router
            .resolve_candidates("default", None, None)
            .await
            .unwrap();
        let providers: Vec<&str> = candidates.iter().map(|c| c.provider.as_str()).collect();
        assert_eq!(providers, vec!["alpha", "beta"]);
        assert_eq!(candidates[0].alias.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn unknown_alias_errors() {
        let router = router_for(YAML);
        let err = router
            .resolve_candidates("missing", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::AliasNotFound(_)));
    }

    #[tokio::test]
    async fn cooldown_excludes_target() {
        let router = router_for(YAML);
        router.cooldowns.mark_failure("alpha", "a-1", None).await;
        let candidates = router
            .resolve_candidates("default", None, None)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider, "beta");
    }

    #[tokio::test]
    async fn all_on_cooldown_errors() {
        let router = router_for(YAML);
        router.cooldowns.mark_failure("alpha", "a-1", None).await;
        router.cooldowns.mark_failure("beta", "b-1", None).await;
        let err = router
            .resolve_candidates("default", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::AllOnCooldown(_)));
    }

    #[tokio::test]
    async fn api_match_narrows_to_speaking_providers() {
        let router = router_for(YAML);
        let candidates = router
            .resolve_candidates("matched", Some(ApiType::Messages), None)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider, "beta");
    }

    #[tokio::test]
    async fn api_match_keeps_original_when_narrowing_empties() {
        let router = router_for(YAML);
        let candidates = router
            .resolve_candidates("matched", Some(ApiType::Gemini), None)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn direct_routing_bypasses_aliases() {
        let router = router_for(YAML);
        let result = router
            .resolve("direct/alpha/some-model", None, None)
            .await
            .unwrap();
        assert_eq!(result.provider, "alpha");
        assert_eq!(result.model, "some-model");
        assert_eq!(result.alias, None);

        let err = router
            .resolve("direct/gamma/x", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::ProviderDisabled(_)));
        let err = router
            .resolve("direct/ghost/x", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn auto_resolves_through_tier_alias() {
        let router = router_for(YAML);
        let request = UnifiedRequest::default();
        let candidates = router
            .resolve_candidates("auto", Some(ApiType::Chat), Some(&request))
            .await
            .unwrap();
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].alias.as_deref(), Some("default"));
    }
}
