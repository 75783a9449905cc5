use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::alias::ModelAlias;
use crate::limits::{ApiKeyConfig, AutoConfig, CooldownConfig, FailoverConfig};
use crate::provider::ProviderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("alias `{0}` has no targets")]
    EmptyAlias(String),
    #[error("alias `{alias}` references unknown provider `{provider}`")]
    UnknownProvider { alias: String, provider: String },
    #[error("additional alias `{extra}` of `{alias}` collides with a canonical alias")]
    AliasCollision { alias: String, extra: String },
    #[error("auto routing tier `{tier}` points at unknown alias `{alias}`")]
    UnknownTierAlias { tier: &'static str, alias: String },
}

/// The whole routing configuration, parsed and validated once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Aliases, keyed by their canonical name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelAlias>,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<AutoConfig>,
    #[serde(default, rename = "apiKeys")]
    pub api_keys: Vec<ApiKeyConfig>,
}

impl ConfigSnapshot {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let snapshot: ConfigSnapshot = serde_yaml::from_str(raw)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let canonical: HashSet<&str> = self.models.keys().map(String::as_str).collect();

        for (name, alias) in &self.models {
            if alias.targets.is_empty() {
                return Err(ConfigError::EmptyAlias(name.clone()));
            }
            for target in &alias.targets {
                if !self.providers.contains_key(&target.provider) {
                    return Err(ConfigError::UnknownProvider {
                        alias: name.clone(),
                        provider: target.provider.clone(),
                    });
                }
            }
            if let Some(extras) = &alias.additional_aliases {
                for extra in extras {
                    if canonical.contains(extra.as_str()) {
                        return Err(ConfigError::AliasCollision {
                            alias: name.clone(),
                            extra: extra.clone(),
                        });
                    }
                }
            }
        }

        if let Some(auto) = &self.auto {
            for (tier, alias) in [
                ("heartbeat", &auto.tier_models.heartbeat),
                ("simple", &auto.tier_models.simple),
                ("medium", &auto.tier_models.medium),
                ("complex", &auto.tier_models.complex),
                ("reasoning", &auto.tier_models.reasoning),
            ] {
                if !self.models.contains_key(alias) {
                    return Err(ConfigError::UnknownTierAlias {
                        tier,
                        alias: alias.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve an alias by canonical name or `additional_aliases` entry.
    /// Canonical keys are checked first; collisions between additional
    /// aliases and canonical keys are rejected at validation.
    pub fn alias(&self, name: &str) -> Option<(&str, &ModelAlias)> {
        if let Some((key, alias)) = self.models.get_key_value(name) {
            return Some((key.as_str(), alias));
        }
        self.models.iter().find_map(|(key, alias)| {
            alias
                .additional_aliases
                .as_ref()?
                .iter()
                .any(|extra| extra == name)
                .then_some((key.as_str(), alias))
        })
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Active API key lookup by secret.
    pub fn api_key_by_secret(&self, secret: &str) -> Option<&ApiKeyConfig> {
        self.api_keys
            .iter()
            .find(|key| key.enabled && key.secret == secret)
    }
}
