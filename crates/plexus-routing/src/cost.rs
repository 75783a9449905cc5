use plexus_config::{ConfigHandle, FlatPricing, Pricing};
use plexus_transform::TokenUsage;

/// Where a price came from, most-specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostSource {
    /// Flat pricing on the model config.
    Model,
    /// Tiered-by-input-tokens pricing on the model config.
    Tiered,
    /// Built-in default price list matched by model name.
    Registry,
    /// Nothing matched; fixed blended estimate.
    Estimate,
}

impl CostSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostSource::Model => "model",
            CostSource::Tiered => "tiered",
            CostSource::Registry => "registry",
            CostSource::Estimate => "estimated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    /// Dollars, discount already applied.
    pub total: f64,
    pub source: CostSource,
    /// Average cost per 1M tokens across the request, for metrics.
    pub per_1m_tokens: f64,
}

/// Fallback prices for well-known model families, used when the config
/// carries no pricing for a target. Matched by substring.
const REGISTRY: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1", 2.00, 8.00),
    ("o3", 2.00, 8.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
    ("claude-haiku", 1.00, 5.00),
    ("gemini-2.5-pro", 1.25, 10.00),
    ("gemini-2.5-flash", 0.30, 2.50),
    ("gemini", 0.50, 3.00),
    ("deepseek", 0.27, 1.10),
];

/// Last-resort blended estimate, dollars per 1M tokens.
const ESTIMATE_INPUT_PER_1M: f64 = 0.50;
const ESTIMATE_OUTPUT_PER_1M: f64 = 1.50;

pub struct CostCalculator {
    config: ConfigHandle,
}

impl CostCalculator {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    /// Price a request. Fallback chain: model-specific flat pricing →
    /// tiered-by-input-tokens → built-in registry → fixed estimate. The
    /// provider discount multiplies the final figure.
    pub fn compute(&self, provider: &str, model: &str, usage: &TokenUsage) -> CostBreakdown {
        let snapshot = self.config.snapshot();
        let provider_config = snapshot.provider(provider);
        let discount = provider_config.map(|p| p.discount).unwrap_or(1.0);

        let (rates, source) = match provider_config
            .and_then(|p| p.model(model))
            .and_then(|m| m.pricing.as_ref())
        {
            Some(pricing @ Pricing::Flat(_)) => (
                pricing.rates_for(usage.input_tokens),
                CostSource::Model,
            ),
            Some(pricing @ Pricing::Tiered { .. }) => (
                pricing.rates_for(usage.input_tokens),
                CostSource::Tiered,
            ),
            None => (None, CostSource::Registry),
        };

        let (rates, source) = match (rates, source) {
            (Some(rates), source) => (rates, source),
            (None, _) => match registry_rates(model) {
                Some(rates) => (rates, CostSource::Registry),
                None => (
                    FlatPricing {
                        input_per_1m: ESTIMATE_INPUT_PER_1M,
                        output_per_1m: ESTIMATE_OUTPUT_PER_1M,
                        cached_per_1m: None,
                        reasoning_per_1m: None,
                    },
                    CostSource::Estimate,
                ),
            },
        };

        let cached = usage.cached_tokens.unwrap_or(0).min(usage.input_tokens);
        let fresh_input = usage.input_tokens - cached;
        let reasoning = usage
            .reasoning_tokens
            .filter(|_| rates.reasoning_per_1m.is_some())
            .unwrap_or(0)
            .min(usage.output_tokens);
        let plain_output = usage.output_tokens - reasoning;

        let mut total = fresh_input as f64 * rates.input_per_1m
            + plain_output as f64 * rates.output_per_1m;
        if let Some(cached_rate) = rates.cached_per_1m {
            total += cached as f64 * cached_rate;
        } else {
            total += cached as f64 * rates.input_per_1m;
        }
        if let Some(reasoning_rate) = rates.reasoning_per_1m {
            total += reasoning as f64 * reasoning_rate;
        }
        total = total / 1e6 * discount;

        let total_tokens = usage.input_tokens + usage.output_tokens;
        let per_1m_tokens = if total_tokens == 0 {
            0.0
        } else {
            total / total_tokens as f64 * 1e6
        };

        CostBreakdown {
            total,
            source,
            per_1m_tokens,
        }
    }
}

fn registry_rates(model: &str) -> Option<FlatPricing> {
    let lower = model.to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|(needle, _, _)| lower.contains(needle))
        .map(|(_, input, output)| FlatPricing {
            input_per_1m: *input,
            output_per_1m: *output,
            cached_per_1m: None,
            reasoning_per_1m: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_config::ConfigSnapshot;

    fn calculator(yaml: &str) -> CostCalculator {
        CostCalculator::new(ConfigHandle::new(ConfigSnapshot::from_yaml(yaml).unwrap()))
    }

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cached_tokens: None,
            reasoning_tokens: None,
        }
    }

    const YAML: &str = r#"
providers:
  priced:
    api_base_url: https://a.example
    models:
      m:
        pricing: { inputPer1M: 2.0, outputPer1M: 10.0 }
  discounted:
    api_base_url: https://b.example
    discount: 0.5
    models:
      m:
        pricing: { inputPer1M: 2.0, outputPer1M: 10.0 }
  tiered:
    api_base_url: https://c.example
    models:
      m:
        pricing:
          tiers:
            - { maxInputTokens: 1000, inputPer1M: 1.0, outputPer1M: 2.0 }
            - { inputPer1M: 3.0, outputPer1M: 6.0 }
  bare:
    api_base_url: https://d.example
"#;

    #[test]
    fn flat_model_pricing() {
        let calc = calculator(YAML);
        let breakdown = calc.compute("priced", "m", &usage(1_000_000, 100_000));
        assert_eq!(breakdown.source, CostSource::Model);
        assert!((breakdown.total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn discount_is_applied() {
        let calc = calculator(YAML);
        let breakdown = calc.compute("discounted", "m", &usage(1_000_000, 100_000));
        assert!((breakdown.total - 1.5).abs() < 1e-9);
    }

    #[test]
    fn tiered_pricing_uses_input_size() {
        let calc = calculator(YAML);
        let small = calc.compute("tiered", "m", &usage(500, 0));
        assert_eq!(small.source, CostSource::Tiered);
        assert!((small.total - 500.0 * 1.0 / 1e6).abs() < 1e-12);
        let large = calc.compute("tiered", "m", &usage(5_000, 0));
        assert!((large.total - 5_000.0 * 3.0 / 1e6).abs() < 1e-12);
    }

    #[test]
    fn registry_then_estimate_fallback() {
        let calc = calculator(YAML);
        let registry = calc.compute("bare", "claude-sonnet-4", &usage(1_000_000, 0));
        assert_eq!(registry.source, CostSource::Registry);
        assert!((registry.total - 3.0).abs() < 1e-9);

        let estimate = calc.compute("bare", "totally-unknown", &usage(1_000_000, 1_000_000));
        assert_eq!(estimate.source, CostSource::Estimate);
        assert!((estimate.total - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cached_tokens_priced_separately_when_configured() {
        let yaml = r#"
providers:
  p:
    api_base_url: https://a.example
    models:
      m:
        pricing: { inputPer1M: 2.0, outputPer1M: 10.0, cachedPer1M: 0.2 }
"#;
        let calc = calculator(yaml);
        let breakdown = calc.compute(
            "p",
            "m",
            &TokenUsage {
                input_tokens: 1_000_000,
                output_tokens: 0,
                cached_tokens: Some(500_000),
                reasoning_tokens: None,
            },
        );
        // Half the input at full rate, half at the cached rate.
        assert!((breakdown.total - (1.0 + 0.1)).abs() < 1e-9);
    }
}
