//! The data-plane engine: dispatcher, upstream client, usage logging, and
//! the top-level [`Engine`] that owns every injected service.

mod dispatcher;
mod engine;
mod error;
mod headers;
mod upstream;
mod usage;

pub use dispatcher::{DispatchOutcome, Dispatcher, StreamHandle};
pub use engine::{Engine, EngineOptions};
pub use error::{DispatchError, RoutingContext};
pub use headers::{build_headers, sanitize_headers};
pub use upstream::{
    NetworkError, NetworkErrorKind, UpstreamBody, UpstreamClient, UpstreamClientConfig,
    UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
pub use usage::UsageLogger;

/// Unix milliseconds now.
pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
