//! Routing configuration: the immutable snapshot every request captures.
//!
//! A snapshot is parsed once (YAML), validated, and then shared read-only
//! behind a [`ConfigHandle`]. Hot reload swaps the pointer atomically;
//! in-flight requests keep the snapshot they started with.

mod alias;
mod handle;
mod limits;
mod provider;
mod snapshot;

pub use alias::{AliasTarget, ModelAlias, SelectorStrategy};
pub use handle::ConfigHandle;
pub use limits::{ApiKeyConfig, AutoConfig, CooldownConfig, FailoverConfig, TierModels};
pub use provider::{
    ApiBaseUrl, FlatPricing, ModelConfig, Pricing, PricingTier, ProviderConfig, ProviderModels,
    ResolvedBaseUrl,
};
pub use snapshot::{ConfigError, ConfigSnapshot};
