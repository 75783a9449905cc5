use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use plexus_common::RequestId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted cooldown state, primary key `(provider, model)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownRow {
    pub provider: String,
    pub model: String,
    /// Absolute expiry, unix milliseconds.
    pub expiry_ms: i64,
    pub consecutive_failures: u32,
    /// Unix milliseconds of the first failure in this run of failures.
    pub created_at_ms: i64,
}

/// Durable map backing the cooldown manager.
///
/// The in-memory map is the authority while the process runs; the store
/// only has to survive restarts. Expired rows are purged on load.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Load rows still live at `now_ms`, purging the rest.
    async fn load_live(&self, now_ms: i64) -> StoreResult<Vec<CooldownRow>>;
    async fn upsert(&self, row: &CooldownRow) -> StoreResult<()>;
    async fn delete(&self, provider: &str, model: &str) -> StoreResult<()>;
    /// Scoped deletion: all rows, one provider's rows, or one key.
    async fn clear(&self, provider: Option<&str>, model: Option<&str>) -> StoreResult<()>;
}

/// One completed (or pending-stream) request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub request_id: RequestId,
    /// Unix milliseconds at request start.
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub client_api_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub provider: String,
    pub model: String,
    pub target_api_type: String,
    pub streaming: bool,
    pub passthrough: bool,
    /// True while a streamed response is still in flight; the finalize
    /// step rewrites the row with real token counts.
    pub pending: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ttft_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ttft_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_overhead_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_tokens_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_tokens_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Where the price came from: `model`, `tiered`, `registry`, `estimated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_source: Option<String>,
}

/// One failed request (post-failover exhaustion or non-retryable error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub request_id: RequestId,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub error_kind: String,
    pub message: String,
    pub attempt_count: u32,
    /// Every `provider/model` tried before giving up.
    pub attempted_targets: Vec<String>,
}

/// Append-style sink for usage and error rows.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert_usage(&self, entry: &UsageLogEntry) -> StoreResult<()>;
    /// Rewrite the row with the same `request_id`. Idempotent; finalizing
    /// an id that was never inserted behaves like an insert.
    async fn finalize_usage(&self, entry: &UsageLogEntry) -> StoreResult<()>;
    async fn insert_error(&self, entry: &ErrorLogEntry) -> StoreResult<()>;
}
