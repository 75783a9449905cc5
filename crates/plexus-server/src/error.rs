use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};
use serde_json::json;

use plexus_common::ApiType;
use plexus_core::DispatchError;
use plexus_protocol::error::{AnthropicErrorEnvelope, GeminiErrorEnvelope, OpenAiErrorEnvelope};

/// Render a failure in the *ingress* dialect, whatever dialect the failing
/// upstream spoke.
pub fn error_response(ingress: ApiType, err: &DispatchError) -> Response<Body> {
    let status = err.client_status();
    let mut message = err.to_string();
    if let Some(routing) = err.routing_context() {
        message = format!(
            "{message} (attempted: {})",
            routing.all_attempted_providers.join(", ")
        );
    }
    dialect_error(ingress, status, err.kind(), &message)
}

pub fn auth_error(ingress: ApiType) -> Response<Body> {
    dialect_error(
        ingress,
        401,
        "authentication_error",
        "missing or invalid API key",
    )
}

pub fn invalid_request(ingress: ApiType, message: &str) -> Response<Body> {
    dialect_error(ingress, 400, "invalid_request_error", message)
}

fn dialect_error(ingress: ApiType, status: u16, kind: &str, message: &str) -> Response<Body> {
    let body = match ingress {
        ApiType::Messages => {
            let kind = match kind {
                "authentication_error" => "authentication_error",
                "invalid_request_error" => "invalid_request_error",
                "overloaded_error" => "overloaded_error",
                _ => "api_error",
            };
            serde_json::to_value(AnthropicErrorEnvelope::new(kind, message))
        }
        ApiType::Gemini => {
            let google_status = match status {
                400 => "INVALID_ARGUMENT",
                401 | 403 => "PERMISSION_DENIED",
                404 => "NOT_FOUND",
                429 => "RESOURCE_EXHAUSTED",
                503 => "UNAVAILABLE",
                _ => "INTERNAL",
            };
            serde_json::to_value(GeminiErrorEnvelope::new(status, google_status, message))
        }
        _ => serde_json::to_value(OpenAiErrorEnvelope::new(kind, message)),
    }
    .unwrap_or_else(|_| json!({ "error": { "message": message } }));

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_routing::RouteError;

    #[test]
    fn envelope_follows_ingress_dialect() {
        let err = DispatchError::Route(RouteError::AliasNotFound("ghost".into()));

        let openai = error_response(ApiType::Chat, &err);
        assert_eq!(openai.status().as_u16(), 400);

        let anthropic = error_response(ApiType::Messages, &err);
        assert_eq!(anthropic.status().as_u16(), 400);

        let gemini = error_response(ApiType::Gemini, &err);
        assert_eq!(gemini.status().as_u16(), 400);
    }
}
