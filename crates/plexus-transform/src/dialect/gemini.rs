//! Gemini generateContent ↔ unified.

use serde_json::{Map, Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::gemini::generate::{
    Content, GenerateContentRequest, GenerateContentResponse, Part,
};

use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, ContentPart, FinishReason, GenerationParams, Role, TokenUsage, ToolChoice,
    ToolDefinition, ToolOutput, TransformError, UnifiedMessage, UnifiedRequest,
};

pub struct GeminiTransformer;

pub(crate) fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("FUNCTION_CALL") => FinishReason::ToolCalls,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") | Some("RECITATION") => {
            FinishReason::ContentFilter
        }
        None => FinishReason::Stop,
        Some(_) => FinishReason::Other,
    }
}

pub(crate) fn render_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ToolCalls => "FUNCTION_CALL",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Error => "OTHER",
        FinishReason::Other => "OTHER",
    }
}

impl DialectTransformer for GeminiTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Gemini
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: GenerateContentRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        let mut unified = UnifiedRequest {
            // The model arrives in the URL path; the server layer fills it.
            incoming_api_type: Some(ApiType::Gemini),
            original_body: Some(original),
            ..Default::default()
        };

        if let Some(config) = &wire.generation_config {
            unified.params = GenerationParams {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
                stop: config.stop_sequences.clone().unwrap_or_default(),
                seed: config.seed,
                presence_penalty: config.presence_penalty,
                frequency_penalty: config.frequency_penalty,
            };
            if config.response_schema.is_some() || config.response_mime_type.is_some() {
                unified.response_format = Some(json!({
                    "mime_type": config.response_mime_type,
                    "schema": config.response_schema,
                }));
            }
        }

        if let Some(system) = &wire.system_instruction {
            let text = parts_text(&system.parts);
            if !text.is_empty() {
                unified
                    .messages
                    .push(UnifiedMessage::text(Role::System, text));
            }
        }

        if let Some(tools) = &wire.tools {
            for tool in tools {
                if let Some(declarations) = &tool.function_declarations {
                    for declaration in declarations {
                        unified.tools.push(ToolDefinition {
                            name: declaration.name.clone(),
                            description: declaration.description.clone(),
                            parameters: declaration.parameters.clone(),
                        });
                    }
                }
                if tool.google_search.is_some() {
                    unified.warn("google_search tool dropped (provider-specific)");
                }
            }
        }
        if let Some(config) = wire
            .tool_config
            .as_ref()
            .and_then(|c| c.function_calling_config.as_ref())
        {
            unified.tool_choice = Some(match config.mode.as_str() {
                "NONE" => ToolChoice::None,
                "ANY" => match config
                    .allowed_function_names
                    .as_ref()
                    .and_then(|names| (names.len() == 1).then(|| names[0].clone()))
                {
                    Some(name) => ToolChoice::Tool(name),
                    None => ToolChoice::Required,
                },
                _ => ToolChoice::Auto,
            });
        }

        for content in &wire.contents {
            let role = match content.role.as_deref() {
                Some("model") => Role::Assistant,
                _ => Role::User,
            };
            let mut parts = Vec::new();
            let mut tool_results = Vec::new();
            for part in &content.parts {
                map_part(part, &mut parts, &mut tool_results, &mut unified.warnings);
            }
            if !tool_results.is_empty() {
                unified.messages.push(UnifiedMessage {
                    role: Role::Tool,
                    parts: tool_results,
                });
            }
            if !parts.is_empty() {
                unified.messages.push(UnifiedMessage { role, parts });
            }
        }

        Ok(unified)
    }

    fn render_request(&self, request: &UnifiedRequest) -> Result<JsonValue, TransformError> {
        let mut contents: Vec<JsonValue> = Vec::new();
        let mut system_parts: Vec<JsonValue> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    for part in &message.parts {
                        if let ContentPart::Text { text } = part {
                            system_parts.push(json!({ "text": text }));
                        }
                    }
                }
                Role::User | Role::Tool => {
                    let parts = render_parts(&message.parts, request);
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "user", "parts": parts }));
                    }
                }
                Role::Assistant => {
                    let parts = render_parts(&message.parts, request);
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "model", "parts": parts }));
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("contents".into(), json!(contents));
        if !system_parts.is_empty() {
            body.insert(
                "systemInstruction".into(),
                json!({ "parts": system_parts }),
            );
        }

        let mut config = Map::new();
        if let Some(value) = request.params.temperature {
            config.insert("temperature".into(), json!(value));
        }
        if let Some(value) = request.params.top_p {
            config.insert("topP".into(), json!(value));
        }
        if let Some(value) = request.params.top_k {
            config.insert("topK".into(), json!(value));
        }
        if let Some(value) = request.params.max_output_tokens {
            config.insert("maxOutputTokens".into(), json!(value));
        }
        if !request.params.stop.is_empty() {
            config.insert("stopSequences".into(), json!(request.params.stop));
        }
        if let Some(value) = request.params.seed {
            config.insert("seed".into(), json!(value));
        }
        if !config.is_empty() {
            body.insert("generationConfig".into(), JsonValue::Object(config));
        }

        if !request.tools.is_empty() {
            let declarations: Vec<JsonValue> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }
        if let Some(choice) = &request.tool_choice {
            let config = match choice {
                ToolChoice::Auto => json!({ "mode": "AUTO" }),
                ToolChoice::None => json!({ "mode": "NONE" }),
                ToolChoice::Required => json!({ "mode": "ANY" }),
                ToolChoice::Tool(name) => {
                    json!({ "mode": "ANY", "allowedFunctionNames": [name] })
                }
            };
            body.insert(
                "toolConfig".into(),
                json!({ "functionCallingConfig": config }),
            );
        }

        Ok(JsonValue::Object(body))
    }

    fn parse_response(
        &self,
        raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        let wire: GenerateContentResponse = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;

        let mut warnings = Vec::new();
        let mut parts = Vec::new();
        let mut finish_reason = FinishReason::Stop;
        if let Some(candidate) = wire.candidates.first() {
            finish_reason = parse_finish_reason(candidate.finish_reason.as_deref());
            if let Some(content) = &candidate.content {
                let mut tool_results = Vec::new();
                for part in &content.parts {
                    map_part(part, &mut parts, &mut tool_results, &mut warnings);
                }
                parts.extend(tool_results);
            }
            // A model turn that called functions finishes with STOP on this
            // wire; normalize to the unified tool-calls reason.
            if finish_reason == FinishReason::Stop
                && parts
                    .iter()
                    .any(|p| matches!(p, ContentPart::ToolCall { .. }))
            {
                finish_reason = FinishReason::ToolCalls;
            }
        }

        let usage = wire
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
                cached_tokens: u.cached_content_token_count,
                reasoning_tokens: u.thoughts_token_count,
            })
            .unwrap_or_default();

        Ok(CompletedResponse {
            id: wire.response_id.unwrap_or_default(),
            model: wire
                .model_version
                .unwrap_or_else(|| request.model.clone()),
            parts,
            finish_reason,
            usage,
            warnings,
            plexus: None,
        })
    }

    fn render_response(&self, response: &CompletedResponse) -> Result<JsonValue, TransformError> {
        let mut parts: Vec<JsonValue> = Vec::new();
        for part in &response.parts {
            match part {
                ContentPart::Text { text } => parts.push(json!({ "text": text })),
                ContentPart::ToolCall {
                    name, arguments, ..
                } => parts.push(json!({
                    "functionCall": { "name": name, "args": arguments }
                })),
                ContentPart::Reasoning { text, .. } => {
                    if !text.is_empty() {
                        parts.push(json!({ "text": text, "thought": true }));
                    }
                }
                _ => {}
            }
        }

        let mut usage = Map::new();
        usage.insert(
            "promptTokenCount".into(),
            json!(response.usage.input_tokens),
        );
        usage.insert(
            "candidatesTokenCount".into(),
            json!(response.usage.output_tokens),
        );
        usage.insert(
            "totalTokenCount".into(),
            json!(response.usage.input_tokens + response.usage.output_tokens),
        );
        if let Some(cached) = response.usage.cached_tokens {
            usage.insert("cachedContentTokenCount".into(), json!(cached));
        }

        let mut body = Map::new();
        body.insert(
            "candidates".into(),
            json!([{
                "content": { "role": "model", "parts": parts },
                "finishReason": render_finish_reason(response.finish_reason),
                "index": 0,
            }]),
        );
        body.insert("usageMetadata".into(), JsonValue::Object(usage));
        if !response.model.is_empty() {
            body.insert("modelVersion".into(), json!(response.model));
        }
        if !response.id.is_empty() {
            body.insert("responseId".into(), json!(response.id));
        }
        if let Some(meta) = &response.plexus {
            if let Ok(value) = serde_json::to_value(meta) {
                body.insert("plexus".into(), value);
            }
        }
        Ok(JsonValue::Object(body))
    }

    fn endpoint(&self, request: &UnifiedRequest) -> String {
        if request.stream {
            // alt=sse keeps the stream in SSE framing instead of a JSON array.
            format!("/v1beta/models/{}:streamGenerateContent?alt=sse", request.model)
        } else {
            format!("/v1beta/models/{}:generateContent", request.model)
        }
    }
}

fn parts_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn map_part(
    part: &Part,
    parts: &mut Vec<ContentPart>,
    tool_results: &mut Vec<ContentPart>,
    warnings: &mut Vec<String>,
) {
    if let Some(call) = &part.function_call {
        parts.push(ContentPart::ToolCall {
            // This wire has no call ids; reuse the name, matching what
            // function_response correlation does.
            id: call.name.clone(),
            name: call.name.clone(),
            arguments: call.args.clone().unwrap_or_else(|| json!({})),
        });
        return;
    }
    if let Some(response) = &part.function_response {
        tool_results.push(ContentPart::ToolResult {
            call_id: response.name.clone(),
            name: Some(response.name.clone()),
            output: ToolOutput::Json(response.response.clone()),
            is_error: false,
        });
        return;
    }
    if let Some(inline) = &part.inline_data {
        parts.push(ContentPart::File {
            media_type: Some(inline.mime_type.clone()),
            data: Some(inline.data.clone()),
            url: None,
        });
        return;
    }
    if let Some(text) = &part.text {
        if part.thought.unwrap_or(false) {
            parts.push(ContentPart::Reasoning {
                text: text.clone(),
                signature: part.thought_signature.clone(),
                encrypted: None,
            });
        } else {
            parts.push(ContentPart::Text { text: text.clone() });
        }
        return;
    }
    if part.file_data.is_some() {
        warnings.push("fileData part dropped (unsupported)".to_string());
    }
}

fn render_parts(unified_parts: &[ContentPart], request: &UnifiedRequest) -> Vec<JsonValue> {
    let mut parts = Vec::new();
    for part in unified_parts {
        match part {
            ContentPart::Text { text } => parts.push(json!({ "text": text })),
            ContentPart::ToolCall {
                name, arguments, ..
            } => parts.push(json!({
                "functionCall": { "name": name, "args": arguments }
            })),
            ContentPart::ToolResult {
                call_id,
                name,
                output,
                ..
            } => {
                let function = name.clone().unwrap_or_else(|| {
                    resolve_call_name(call_id, request).unwrap_or_else(|| call_id.clone())
                });
                let response = match output {
                    ToolOutput::Json(value) => value.clone(),
                    other => json!({ "result": other.to_plain_text() }),
                };
                parts.push(json!({
                    "functionResponse": { "name": function, "response": response }
                }));
            }
            ContentPart::File {
                media_type, data, ..
            } => {
                if let Some(data) = data {
                    parts.push(json!({
                        "inlineData": {
                            "mimeType": media_type.as_deref().unwrap_or("application/octet-stream"),
                            "data": data,
                        }
                    }));
                }
            }
            ContentPart::Reasoning { text, .. } => {
                if !text.is_empty() {
                    parts.push(json!({ "text": text, "thought": true }));
                }
            }
        }
    }
    parts
}

/// Find the tool name behind a call id by scanning earlier assistant turns.
fn resolve_call_name(call_id: &str, request: &UnifiedRequest) -> Option<String> {
    for message in &request.messages {
        for part in &message.parts {
            if let ContentPart::ToolCall { id, name, .. } = part {
                if id == call_id {
                    return Some(name.clone());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_maps_roles_and_config() {
        let raw = br#"{
            "systemInstruction": {"parts": [{"text": "be brief"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "f", "args": {"a": 1}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "f", "response": {"ok": true}}}]}
            ],
            "generationConfig": {"maxOutputTokens": 100, "temperature": 0.5}
        }"#;
        let unified = GeminiTransformer.parse_request(raw).unwrap();
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[1].role, Role::User);
        assert_eq!(unified.messages[2].role, Role::Assistant);
        assert_eq!(unified.messages[3].role, Role::Tool);
        assert_eq!(unified.params.max_output_tokens, Some(100));
    }

    #[test]
    fn stream_endpoint_uses_sse_alt() {
        let mut request = UnifiedRequest::default();
        request.model = "gemini-pro".into();
        request.stream = true;
        assert_eq!(
            GeminiTransformer.endpoint(&request),
            "/v1beta/models/gemini-pro:streamGenerateContent?alt=sse"
        );
        request.stream = false;
        assert_eq!(
            GeminiTransformer.endpoint(&request),
            "/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[test]
    fn tool_call_without_explicit_finish_maps_to_tool_calls() {
        let raw = br#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "f", "args": {}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7}
        }"#;
        let response = GeminiTransformer
            .parse_response(raw, &UnifiedRequest::default())
            .unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.input_tokens, 5);
    }

    #[test]
    fn finish_reason_table() {
        assert_eq!(parse_finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(parse_finish_reason(Some("SAFETY")), FinishReason::ContentFilter);
        assert_eq!(render_finish_reason(FinishReason::Error), "OTHER");
        assert_eq!(render_finish_reason(FinishReason::ToolCalls), "FUNCTION_CALL");
    }
}
