//! Shared leaf types for plexus.
//!
//! This crate holds the vocabulary every other crate speaks: wire dialects,
//! per-request context, and process-level settings. It depends on nothing
//! above it.

mod api;
mod context;
mod settings;

pub use api::{ApiType, UnknownApiType};
pub use context::{RequestContext, RequestId};
pub use settings::{ServerSettings, ServerSettingsPatch, SettingsError};
