use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use plexus_common::ApiType;

use crate::dialect;
use crate::unified::{CompletedResponse, TransformError, UnifiedRequest};

/// One wire dialect's translation surface.
///
/// `parse_*` goes wire → unified, `render_*` goes unified → wire. A
/// transformer is used on the client side (parse request, render response)
/// or the provider side (render request, parse response) as the dispatcher
/// needs; pass-through is decided outside this trait.
pub trait DialectTransformer: Send + Sync {
    fn api_type(&self) -> ApiType;

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError>;

    fn render_request(&self, request: &UnifiedRequest) -> Result<JsonValue, TransformError>;

    fn parse_response(
        &self,
        raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError>;

    fn render_response(&self, response: &CompletedResponse) -> Result<JsonValue, TransformError>;

    /// Path appended to the provider base URL for this request.
    fn endpoint(&self, request: &UnifiedRequest) -> String;
}

/// Transformers keyed by api type.
#[derive(Clone)]
pub struct TransformerRegistry {
    by_type: HashMap<ApiType, Arc<dyn DialectTransformer>>,
}

impl TransformerRegistry {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// All built-in dialects registered.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(dialect::openai_chat::OpenAiChatTransformer));
        registry.register(Arc::new(dialect::anthropic::AnthropicTransformer));
        registry.register(Arc::new(dialect::gemini::GeminiTransformer));
        registry.register(Arc::new(dialect::openai_responses::OpenAiResponsesTransformer));
        registry.register(Arc::new(dialect::embeddings::EmbeddingsTransformer));
        registry.register(Arc::new(dialect::images::ImagesTransformer));
        registry.register(Arc::new(dialect::speech::SpeechTransformer));
        registry
    }

    pub fn register(&mut self, transformer: Arc<dyn DialectTransformer>) {
        self.by_type.insert(transformer.api_type(), transformer);
    }

    pub fn get(&self, api_type: ApiType) -> Option<Arc<dyn DialectTransformer>> {
        self.by_type.get(&api_type).cloned()
    }

    pub fn supports(&self, api_type: ApiType) -> bool {
        self.by_type.contains_key(&api_type)
    }
}
