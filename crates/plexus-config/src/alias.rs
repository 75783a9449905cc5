use serde::{Deserialize, Serialize};

/// A named routing entry: client-facing model name to an ordered list of
/// concrete `(provider, model)` targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAlias {
    pub targets: Vec<AliasTarget>,
    /// Strategy name, parsed leniently at use (unknown falls back to
    /// `random` with a warning).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// `api_match` narrows candidates to providers speaking the incoming
    /// dialect before selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_aliases: Option<Vec<String>>,
    /// `chat` (default), `embeddings`, …
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ModelAlias {
    pub fn api_match_priority(&self) -> bool {
        self.priority.as_deref() == Some("api_match")
    }

    pub fn strategy(&self) -> SelectorStrategy {
        SelectorStrategy::parse_lenient(self.selector.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasTarget {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorStrategy {
    #[default]
    Random,
    InOrder,
    Cost,
    Latency,
    Performance,
}

impl SelectorStrategy {
    /// Parse a configured name. Callers log the unknown-name fallback
    /// themselves so the warning carries request context.
    pub fn parse(name: &str) -> Option<SelectorStrategy> {
        match name {
            "random" => Some(SelectorStrategy::Random),
            "in_order" => Some(SelectorStrategy::InOrder),
            "cost" => Some(SelectorStrategy::Cost),
            "latency" => Some(SelectorStrategy::Latency),
            "performance" => Some(SelectorStrategy::Performance),
            _ => None,
        }
    }

    pub fn parse_lenient(name: Option<&str>) -> SelectorStrategy {
        name.and_then(SelectorStrategy::parse).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorStrategy::Random => "random",
            SelectorStrategy::InOrder => "in_order",
            SelectorStrategy::Cost => "cost",
            SelectorStrategy::Latency => "latency",
            SelectorStrategy::Performance => "performance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_falls_back_to_random() {
        assert_eq!(
            SelectorStrategy::parse_lenient(Some("fastest")),
            SelectorStrategy::Random
        );
        assert_eq!(SelectorStrategy::parse_lenient(None), SelectorStrategy::Random);
        assert_eq!(
            SelectorStrategy::parse_lenient(Some("latency")),
            SelectorStrategy::Latency
        );
    }

    #[test]
    fn target_enabled_defaults_true() {
        let target: AliasTarget =
            serde_yaml::from_str("{ provider: p, model: m }").unwrap();
        assert!(target.enabled);
        assert_eq!(target.weight, None);
    }
}
