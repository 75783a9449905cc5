use std::time::Instant;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::ApiType;

pub type RequestId = String;

/// Per-request state, owned by the handling task.
///
/// Created at ingress, filled in by the router and dispatcher, consumed by
/// the usage logger. Never shared across requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    /// Wall-clock time the request arrived, for log rows.
    pub started_at: OffsetDateTime,
    /// Monotonic start, for latency/TTFT math.
    pub start: Instant,
    pub client_ip: Option<String>,
    pub api_key_name: Option<String>,
    pub client_api_type: ApiType,
    pub alias_used: Option<String>,
    pub actual_provider: Option<String>,
    pub actual_model: Option<String>,
    pub target_api_type: Option<ApiType>,
    pub passthrough: bool,
    pub streaming: bool,
    /// First byte received from the provider.
    pub provider_first_token: Option<Instant>,
    /// First byte forwarded to the client.
    pub client_first_token: Option<Instant>,
}

impl RequestContext {
    pub fn new(client_api_type: ApiType) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            started_at: OffsetDateTime::now_utc(),
            start: Instant::now(),
            client_ip: None,
            api_key_name: None,
            client_api_type,
            alias_used: None,
            actual_provider: None,
            actual_model: None,
            target_api_type: None,
            passthrough: false,
            streaming: false,
            provider_first_token: None,
            client_first_token: None,
        }
    }

    /// Adopt a caller-supplied request id (e.g. from `x-request-id`).
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn provider_ttft_ms(&self) -> Option<u64> {
        self.provider_first_token
            .map(|t| t.duration_since(self.start).as_millis() as u64)
    }

    pub fn client_ttft_ms(&self) -> Option<u64> {
        self.client_first_token
            .map(|t| t.duration_since(self.start).as_millis() as u64)
    }

    /// Latency added by translation: client TTFT minus provider TTFT.
    /// `None` unless both timestamps were recorded.
    pub fn transformation_overhead_ms(&self) -> Option<i64> {
        match (self.client_ttft_ms(), self.provider_ttft_ms()) {
            (Some(client), Some(provider)) => Some(client as i64 - provider as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn overhead_requires_both_timestamps() {
        let mut ctx = RequestContext::new(ApiType::Chat);
        assert_eq!(ctx.transformation_overhead_ms(), None);
        ctx.provider_first_token = Some(ctx.start + Duration::from_millis(40));
        assert_eq!(ctx.transformation_overhead_ms(), None);
        ctx.client_first_token = Some(ctx.start + Duration::from_millis(55));
        assert_eq!(ctx.transformation_overhead_ms(), Some(15));
    }
}
