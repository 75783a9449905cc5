//! Speech synthesis ↔ unified. Pass-through shape; the response is raw
//! audio bytes, never JSON.

use serde_json::{Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::openai::audio::SpeechRequest;

use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, FinishReason, TokenUsage, TransformError, UnifiedRequest,
};

pub struct SpeechTransformer;

impl DialectTransformer for SpeechTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Speech
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: SpeechRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        Ok(UnifiedRequest {
            model: wire.model,
            incoming_api_type: Some(ApiType::Speech),
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
        Err(TransformError::Unsupported(ApiType::Speech))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/audio/speech".to_string()
    }
}
