use serde::{Deserialize, Serialize};

/// Exponential-backoff bounds for target cooldowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownConfig {
    #[serde(default = "default_initial_minutes")]
    pub initial_minutes: u64,
    #[serde(default = "default_max_minutes")]
    pub max_minutes: u64,
}

fn default_initial_minutes() -> u64 {
    2
}

fn default_max_minutes() -> u64 {
    300
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            initial_minutes: default_initial_minutes(),
            max_minutes: default_max_minutes(),
        }
    }
}

impl CooldownConfig {
    pub fn initial_ms(&self) -> u64 {
        self.initial_minutes * 60_000
    }

    pub fn max_ms(&self) -> u64 {
        self.max_minutes * 60_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
    /// Caps how many candidates one request may try; absent = all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_retryable_errors() -> Vec<String> {
    vec![
        "ECONNREFUSED".to_string(),
        "ETIMEDOUT".to_string(),
        "ENOTFOUND".to_string(),
    ]
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retryable_status_codes: default_retryable_status_codes(),
            retryable_errors: default_retryable_errors(),
            max_attempts: None,
        }
    }
}

/// Settings for the `auto` model alias (complexity-classified routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub tier_models: TierModels,
    #[serde(default = "default_boost_threshold")]
    pub agentic_boost_threshold: f64,
}

fn default_boost_threshold() -> f64 {
    0.8
}

/// One alias name per complexity tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierModels {
    pub heartbeat: String,
    pub simple: String,
    pub medium: String,
    pub complex: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub secret: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}
