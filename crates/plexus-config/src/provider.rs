use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use plexus_common::ApiType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_base_url: ApiBaseUrl,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub disable_cooldown: bool,
    /// Extra request headers, merged last (they win over computed headers).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Merged into every outbound payload for this provider.
    #[serde(default, rename = "extraBody", skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<JsonValue>,
    /// Forces the outgoing dialect regardless of the incoming one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_transformer: Option<ApiType>,
    /// Cost multiplier applied after pricing (1.0 = list price).
    #[serde(default = "default_discount")]
    pub discount: f64,
    #[serde(default)]
    pub models: ProviderModels,
}

fn default_true() -> bool {
    true
}

fn default_discount() -> f64 {
    1.0
}

impl ProviderConfig {
    /// API types this provider can serve, inferred from the `api_base_url`
    /// map keys. A bare string URL implies no inference (any type).
    pub fn inferred_api_types(&self) -> Vec<ApiType> {
        match &self.api_base_url {
            ApiBaseUrl::Url(_) => Vec::new(),
            ApiBaseUrl::PerApiType(map) => map
                .keys()
                .filter(|k| k.as_str() != "default")
                .filter_map(|k| k.parse::<ApiType>().ok())
                .collect(),
        }
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.get(id)
    }
}

/// A single base URL, or one per API type with an optional `default` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiBaseUrl {
    Url(String),
    PerApiType(BTreeMap<String, String>),
}

/// Result of base-URL resolution; `fallback` flags that neither the exact
/// api-type key nor `default` matched and the first entry was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBaseUrl {
    pub url: String,
    pub fallback: bool,
}

impl ApiBaseUrl {
    /// Resolve for an api type: exact key, then `default`, then the first
    /// entry. Trailing slashes are stripped. `None` only for an empty map.
    pub fn resolve(&self, api_type: ApiType) -> Option<ResolvedBaseUrl> {
        match self {
            ApiBaseUrl::Url(url) => Some(ResolvedBaseUrl {
                url: url.trim_end_matches('/').to_string(),
                fallback: false,
            }),
            ApiBaseUrl::PerApiType(map) => {
                if let Some(url) = map.get(api_type.as_str()) {
                    return Some(ResolvedBaseUrl {
                        url: url.trim_end_matches('/').to_string(),
                        fallback: false,
                    });
                }
                if let Some(url) = map.get("default") {
                    return Some(ResolvedBaseUrl {
                        url: url.trim_end_matches('/').to_string(),
                        fallback: false,
                    });
                }
                map.values().next().map(|url| ResolvedBaseUrl {
                    url: url.trim_end_matches('/').to_string(),
                    fallback: true,
                })
            }
        }
    }
}

/// Either a map of model id to config, or a bare list of model ids
/// (shorthand for "known models, no pricing").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderModels {
    Table(BTreeMap<String, ModelConfig>),
    List(Vec<String>),
}

impl Default for ProviderModels {
    fn default() -> Self {
        ProviderModels::Table(BTreeMap::new())
    }
}

impl ProviderModels {
    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        match self {
            ProviderModels::Table(map) => map.get(id),
            ProviderModels::List(_) => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            ProviderModels::Table(map) => map.contains_key(id),
            ProviderModels::List(ids) => ids.iter().any(|m| m == id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `chat`, `embeddings`, … Defaults to chat.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Pricing>,
    /// Restricts which provider API types may serve this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_via: Option<Vec<ApiType>>,
}

impl ModelConfig {
    pub fn is_embeddings(&self) -> bool {
        self.kind.as_deref() == Some("embeddings")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pricing {
    /// Tiered by input token count; first tier whose `maxInputTokens`
    /// covers the request wins. Tried before `Flat` because a tiered
    /// object is also a valid flat object minus required fields.
    Tiered { tiers: Vec<PricingTier> },
    Flat(FlatPricing),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatPricing {
    #[serde(rename = "inputPer1M")]
    pub input_per_1m: f64,
    #[serde(rename = "outputPer1M")]
    pub output_per_1m: f64,
    #[serde(default, rename = "cachedPer1M", skip_serializing_if = "Option::is_none")]
    pub cached_per_1m: Option<f64>,
    #[serde(
        default,
        rename = "reasoningPer1M",
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_per_1m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTier {
    /// Upper bound (inclusive) of input tokens for this tier; absent means
    /// the open-ended top tier.
    #[serde(default, rename = "maxInputTokens", skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(rename = "inputPer1M")]
    pub input_per_1m: f64,
    #[serde(rename = "outputPer1M")]
    pub output_per_1m: f64,
    #[serde(default, rename = "cachedPer1M", skip_serializing_if = "Option::is_none")]
    pub cached_per_1m: Option<f64>,
}

impl Pricing {
    /// Flat rates applicable at the given input size.
    pub fn rates_for(&self, input_tokens: u64) -> Option<FlatPricing> {
        match self {
            Pricing::Flat(flat) => Some(flat.clone()),
            Pricing::Tiered { tiers } => {
                let tier = tiers
                    .iter()
                    .find(|t| t.max_input_tokens.is_none_or(|max| input_tokens <= max))
                    .or_else(|| tiers.last())?;
                Some(FlatPricing {
                    input_per_1m: tier.input_per_1m,
                    output_per_1m: tier.output_per_1m,
                    cached_per_1m: tier.cached_per_1m,
                    reasoning_per_1m: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_resolution_order() {
        let mut map = BTreeMap::new();
        map.insert("chat".to_string(), "https://a.example/v1/".to_string());
        map.insert("default".to_string(), "https://d.example".to_string());
        let base = ApiBaseUrl::PerApiType(map);

        let exact = base.resolve(ApiType::Chat).unwrap();
        assert_eq!(exact.url, "https://a.example/v1");
        assert!(!exact.fallback);

        let def = base.resolve(ApiType::Messages).unwrap();
        assert_eq!(def.url, "https://d.example");
        assert!(!def.fallback);
    }

    #[test]
    fn base_url_first_entry_fallback() {
        let mut map = BTreeMap::new();
        map.insert("gemini".to_string(), "https://g.example/".to_string());
        let base = ApiBaseUrl::PerApiType(map);
        let resolved = base.resolve(ApiType::Chat).unwrap();
        assert_eq!(resolved.url, "https://g.example");
        assert!(resolved.fallback);
    }

    #[test]
    fn tiered_pricing_picks_covering_tier() {
        let pricing: Pricing = serde_yaml::from_str(
            r#"
tiers:
  - { maxInputTokens: 128000, inputPer1M: 1.0, outputPer1M: 2.0 }
  - { inputPer1M: 2.0, outputPer1M: 4.0 }
"#,
        )
        .unwrap();
        assert_eq!(pricing.rates_for(1000).unwrap().input_per_1m, 1.0);
        assert_eq!(pricing.rates_for(128_000).unwrap().input_per_1m, 1.0);
        assert_eq!(pricing.rates_for(128_001).unwrap().input_per_1m, 2.0);
    }

    #[test]
    fn flat_pricing_parses() {
        let pricing: Pricing =
            serde_yaml::from_str("{ inputPer1M: 3.0, outputPer1M: 15.0, cachedPer1M: 0.3 }")
                .unwrap();
        let rates = pricing.rates_for(0).unwrap();
        assert_eq!(rates.output_per_1m, 15.0);
        assert_eq!(rates.cached_per_1m, Some(0.3));
    }

    #[test]
    fn inferred_api_types_skip_default_key() {
        let provider: ProviderConfig = serde_yaml::from_str(
            r#"
api_base_url: { chat: "https://a", messages: "https://b", default: "https://c" }
"#,
        )
        .unwrap();
        let mut types = provider.inferred_api_types();
        types.sort_by_key(|t| t.as_str());
        assert_eq!(types, vec![ApiType::Chat, ApiType::Messages]);
    }
}
