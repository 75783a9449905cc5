//! Image generation ↔ unified. Pass-through shape, model rewrite only.

use serde_json::{Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::openai::images::ImagesRequest;

use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, FinishReason, TokenUsage, TransformError, UnifiedRequest,
};

pub struct ImagesTransformer;

impl DialectTransformer for ImagesTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Images
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: ImagesRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        Ok(UnifiedRequest {
            model: wire.model.unwrap_or_default(),
            incoming_api_type: Some(ApiType::Images),
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
        _raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        // No token usage on this wire; the cost calculator falls back to a
        // fixed estimate.
        Ok(CompletedResponse {
            id: request.request_id.clone().unwrap_or_default(),
            model: request.model.clone(),
            parts: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            warnings: Vec::new(),
            plexus: None,
        })
    }

    fn render_response(&self, _response: &CompletedResponse) -> Result<JsonValue, TransformError> {
        Err(TransformError::Unsupported(ApiType::Images))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/images/generations".to_string()
    }
}
