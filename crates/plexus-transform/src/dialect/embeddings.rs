//! Embeddings ↔ unified.
//!
//! Embeddings requests have no messages; the unified value carries the
//! model and the original body, and rendering rewrites `model` in place.
//! Only OpenAI-shaped upstreams are supported for this operation.

use serde_json::{Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::openai::embeddings::{EmbeddingsRequest, EmbeddingsResponse};

use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, FinishReason, TokenUsage, TransformError, UnifiedRequest,
};

pub struct EmbeddingsTransformer;

impl DialectTransformer for EmbeddingsTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Embeddings
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: EmbeddingsRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        Ok(UnifiedRequest {
            model: wire.model,
            incoming_api_type: Some(ApiType::Embeddings),
            original_body: Some(original),
            ..Default::default()
        })
    }

    fn render_request(&self, request: &UnifiedRequest) -> Result<JsonValue, TransformError> {
        let mut body = request
            .original_body
            .clone()
            .ok_or_else(|| TransformError::InvalidRequest("missing original body".into()))?;
        if let Some(object) = body.as_object_mut() {
            object.insert("model".into(), json!(request.model));
        }
        Ok(body)
    }

    fn parse_response(
        &self,
        raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        let wire: EmbeddingsResponse = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;
        Ok(CompletedResponse {
            id: request.request_id.clone().unwrap_or_default(),
            model: wire.model,
            parts: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: wire
                .usage
                .as_ref()
                .map(|u| TokenUsage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: 0,
                    cached_tokens: None,
                    reasoning_tokens: None,
                })
                .unwrap_or_default(),
            warnings: Vec::new(),
            plexus: None,
        })
    }

    fn render_response(&self, _response: &CompletedResponse) -> Result<JsonValue, TransformError> {
        // Embeddings are relayed pass-through; the unified view only feeds
        // usage accounting.
        Err(TransformError::Unsupported(ApiType::Embeddings))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/embeddings".to_string()
    }
}
