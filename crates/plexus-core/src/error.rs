use plexus_common::ApiType;
use plexus_routing::RouteError;
use plexus_transform::TransformError;

/// Everything known about the failing attempt(s), for error envelopes and
/// the inference-error log.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub provider: String,
    pub target_model: String,
    pub target_api_type: ApiType,
    pub url: String,
    /// Credential values already masked.
    pub sanitized_headers: Vec<(String, String)>,
    pub status_code: Option<u16>,
    pub provider_response: Option<String>,
    pub attempt_count: u32,
    /// Every `provider/model` tried, in order.
    pub all_attempted_providers: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// Upstream answered with a non-retryable status; relayed to the caller
    /// in their own dialect with the upstream status.
    #[error("upstream returned {status}")]
    Upstream {
        status: u16,
        body: String,
        context: Box<RoutingContext>,
    },
    /// Every candidate failed.
    #[error("all {} candidate(s) failed: {message}", context.attempt_count)]
    Exhausted {
        message: String,
        context: Box<RoutingContext>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// HTTP status to answer the client with.
    pub fn client_status(&self) -> u16 {
        match self {
            DispatchError::Route(err) => match err {
                RouteError::AliasNotFound(_)
                | RouteError::ProviderNotFound(_)
                | RouteError::ProviderDisabled(_)
                | RouteError::AllDisabled(_) => 400,
                RouteError::AllOnCooldown(_) | RouteError::NoCompatibleTarget(_) => 503,
                RouteError::AutoNotConfigured => 400,
            },
            DispatchError::Transform(TransformError::InvalidRequest(_)) => 400,
            DispatchError::Transform(_) => 502,
            DispatchError::Upstream { status, .. } => *status,
            DispatchError::Exhausted { .. } => 502,
            DispatchError::Internal(_) => 500,
        }
    }

    /// Dialect-neutral error type label; the server maps it into the
    /// caller's envelope shape.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Route(RouteError::AllOnCooldown(_))
            | DispatchError::Route(RouteError::NoCompatibleTarget(_)) => "overloaded_error",
            DispatchError::Route(_) => "invalid_request_error",
            DispatchError::Transform(TransformError::InvalidRequest(_)) => "invalid_request_error",
            DispatchError::Transform(_) => "api_error",
            DispatchError::Upstream { status, .. } if *status < 500 => "invalid_request_error",
            DispatchError::Upstream { .. } => "api_error",
            DispatchError::Exhausted { .. } => "api_error",
            DispatchError::Internal(_) => "api_error",
        }
    }

    pub fn routing_context(&self) -> Option<&RoutingContext> {
        match self {
            DispatchError::Upstream { context, .. } | DispatchError::Exhausted { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            DispatchError::Route(RouteError::AliasNotFound("x".into())).client_status(),
            400
        );
        assert_eq!(
            DispatchError::Route(RouteError::AllOnCooldown("x".into())).client_status(),
            503
        );
        let upstream = DispatchError::Upstream {
            status: 413,
            body: String::new(),
            context: Box::new(RoutingContext {
                provider: "p".into(),
                target_model: "m".into(),
                target_api_type: ApiType::Chat,
                url: String::new(),
                sanitized_headers: Vec::new(),
                status_code: Some(413),
                provider_response: None,
                attempt_count: 1,
                all_attempted_providers: vec!["p/m".into()],
            }),
        };
        assert_eq!(upstream.client_status(), 413);
        assert_eq!(upstream.kind(), "invalid_request_error");
    }
}
