//! Anthropic messages ↔ unified.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::claude::messages::{
    ClaudeContent, ClaudeToolChoice, ContentBlock, MessagesRequest, MessagesResponse, SystemPrompt,
    ToolResultContent,
};

use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, ContentPart, FinishReason, GenerationParams, Role, TokenUsage, ToolChoice,
    ToolDefinition, ToolOutput, TransformError, UnifiedMessage, UnifiedRequest,
};

pub struct AnthropicTransformer;

/// Default `max_tokens` when the source dialect never set one; the field is
/// mandatory on this wire.
const DEFAULT_MAX_TOKENS: u64 = 4096;

pub(crate) fn parse_stop_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("end_turn") | Some("stop_sequence") | Some("pause_turn") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        None => FinishReason::Stop,
        Some(_) => FinishReason::Other,
    }
}

pub(crate) fn render_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "refusal",
        FinishReason::Error => "error",
        FinishReason::Other => "end_turn",
    }
}

impl DialectTransformer for AnthropicTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Messages
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: MessagesRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        let mut unified = UnifiedRequest {
            model: wire.model.clone(),
            stream: wire.stream.unwrap_or(false),
            incoming_api_type: Some(ApiType::Messages),
            metadata: wire.metadata.clone(),
            original_body: Some(original),
            ..Default::default()
        };

        unified.params = GenerationParams {
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: wire.top_k,
            max_output_tokens: Some(wire.max_tokens),
            stop: wire.stop_sequences.clone().unwrap_or_default(),
            seed: None,
            presence_penalty: None,
            frequency_penalty: None,
        };

        if let Some(system) = &wire.system {
            let text = match system {
                SystemPrompt::Text(text) => text.clone(),
                SystemPrompt::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| b.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            unified
                .messages
                .push(UnifiedMessage::text(Role::System, text));
        }

        if let Some(tools) = &wire.tools {
            for tool in tools {
                unified.tools.push(ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                });
            }
        }
        unified.tool_choice = wire.tool_choice.as_ref().map(|choice| match choice {
            ClaudeToolChoice::Auto => ToolChoice::Auto,
            ClaudeToolChoice::Any => ToolChoice::Required,
            ClaudeToolChoice::None => ToolChoice::None,
            ClaudeToolChoice::Tool { name } => ToolChoice::Tool(name.clone()),
        });

        for message in &wire.messages {
            let role = if message.role == "assistant" {
                Role::Assistant
            } else {
                Role::User
            };
            let mut parts = Vec::new();
            let mut tool_results = Vec::new();
            match &message.content {
                ClaudeContent::Text(text) => parts.push(ContentPart::Text { text: text.clone() }),
                ClaudeContent::Blocks(blocks) => {
                    for block in blocks {
                        match block_to_unified(block, &mut unified.warnings) {
                            BlockMapping::Part(part) => parts.push(part),
                            BlockMapping::ToolResult(part) => tool_results.push(part),
                            BlockMapping::Dropped => {}
                        }
                    }
                }
            }
            // Tool results ride user turns on this wire; unified keeps them
            // in a dedicated tool role so every dialect can place them.
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
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert(
            "max_tokens".into(),
            json!(request.params.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );

        let mut system_text = String::new();
        let mut messages: Vec<JsonValue> = Vec::new();
        for message in &request.messages {
            match message.role {
                Role::System => {
                    for part in &message.parts {
                        if let ContentPart::Text { text } = part {
                            if !system_text.is_empty() {
                                system_text.push('\n');
                            }
                            system_text.push_str(text);
                        }
                    }
                }
                Role::User | Role::Tool => {
                    let blocks = render_user_blocks(message);
                    if !blocks.is_empty() {
                        merge_or_push(&mut messages, "user", blocks);
                    }
                }
                Role::Assistant => {
                    let blocks = render_assistant_blocks(message);
                    if !blocks.is_empty() {
                        merge_or_push(&mut messages, "assistant", blocks);
                    }
                }
            }
        }
        if !system_text.is_empty() {
            body.insert("system".into(), json!(system_text));
        }
        body.insert("messages".into(), json!(messages));

        if let Some(value) = request.params.temperature {
            body.insert("temperature".into(), json!(value));
        }
        if let Some(value) = request.params.top_p {
            body.insert("top_p".into(), json!(value));
        }
        if let Some(value) = request.params.top_k {
            body.insert("top_k".into(), json!(value));
        }
        if !request.params.stop.is_empty() {
            body.insert("stop_sequences".into(), json!(request.params.stop));
        }
        if request.stream {
            body.insert("stream".into(), json!(true));
        }
        if !request.tools.is_empty() {
            let tools: Vec<JsonValue> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool
                            .parameters
                            .clone()
                            .unwrap_or_else(|| json!({ "type": "object" })),
                    })
                })
                .collect();
            body.insert("tools".into(), json!(tools));
        }
        if let Some(choice) = &request.tool_choice {
            let value = match choice {
                ToolChoice::Auto => json!({ "type": "auto" }),
                ToolChoice::Required => json!({ "type": "any" }),
                ToolChoice::None => json!({ "type": "none" }),
                ToolChoice::Tool(name) => json!({ "type": "tool", "name": name }),
            };
            body.insert("tool_choice".into(), value);
        }

        Ok(JsonValue::Object(body))
    }

    fn parse_response(
        &self,
        raw: &[u8],
        _request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        let wire: MessagesResponse = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;

        let mut warnings = Vec::new();
        let mut parts = Vec::new();
        for block in &wire.content {
            match block_to_unified(block, &mut warnings) {
                BlockMapping::Part(part) | BlockMapping::ToolResult(part) => parts.push(part),
                BlockMapping::Dropped => {}
            }
        }

        Ok(CompletedResponse {
            id: wire.id,
            model: wire.model,
            parts,
            finish_reason: parse_stop_reason(wire.stop_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: wire.usage.input_tokens,
                output_tokens: wire.usage.output_tokens,
                cached_tokens: wire.usage.cache_read_input_tokens,
                reasoning_tokens: None,
            },
            warnings,
            plexus: None,
        })
    }

    fn render_response(&self, response: &CompletedResponse) -> Result<JsonValue, TransformError> {
        let mut content: Vec<JsonValue> = Vec::new();
        for part in &response.parts {
            if let Some(block) = unified_to_block(part) {
                content.push(block);
            }
        }

        let mut body = Map::new();
        body.insert("id".into(), json!(response.id));
        body.insert("type".into(), json!("message"));
        body.insert("role".into(), json!("assistant"));
        body.insert("model".into(), json!(response.model));
        body.insert("content".into(), json!(content));
        body.insert(
            "stop_reason".into(),
            json!(render_stop_reason(response.finish_reason)),
        );
        body.insert("stop_sequence".into(), JsonValue::Null);
        let mut usage = Map::new();
        usage.insert("input_tokens".into(), json!(response.usage.input_tokens));
        usage.insert("output_tokens".into(), json!(response.usage.output_tokens));
        if let Some(cached) = response.usage.cached_tokens {
            usage.insert("cache_read_input_tokens".into(), json!(cached));
        }
        body.insert("usage".into(), JsonValue::Object(usage));
        if let Some(meta) = &response.plexus {
            if let Ok(value) = serde_json::to_value(meta) {
                body.insert("plexus".into(), value);
            }
        }
        Ok(JsonValue::Object(body))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/v1/messages".to_string()
    }
}

enum BlockMapping {
    Part(ContentPart),
    ToolResult(ContentPart),
    Dropped,
}

fn block_to_unified(block: &ContentBlock, warnings: &mut Vec<String>) -> BlockMapping {
    match block {
        ContentBlock::Text { text } => BlockMapping::Part(ContentPart::Text { text: text.clone() }),
        ContentBlock::Image { source } => BlockMapping::Part(ContentPart::File {
            media_type: source.media_type.clone(),
            data: source.data.clone(),
            url: source.url.clone(),
        }),
        ContentBlock::ToolUse { id, name, input } => BlockMapping::Part(ContentPart::ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: input.clone(),
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let output = match content {
                Some(ToolResultContent::Text(text)) => ToolOutput::from_wire_string(text),
                Some(ToolResultContent::Blocks(blocks)) => {
                    let mut parts = Vec::new();
                    for inner in blocks {
                        if let BlockMapping::Part(part) = block_to_unified(inner, warnings) {
                            parts.push(part);
                        }
                    }
                    ToolOutput::Content(parts)
                }
                None => ToolOutput::Text(String::new()),
            };
            BlockMapping::ToolResult(ContentPart::ToolResult {
                call_id: tool_use_id.clone(),
                name: None,
                output,
                is_error: is_error.unwrap_or(false),
            })
        }
        ContentBlock::Thinking {
            thinking,
            signature,
        } => BlockMapping::Part(ContentPart::Reasoning {
            text: thinking.clone(),
            signature: signature.clone(),
            encrypted: None,
        }),
        ContentBlock::RedactedThinking { data } => BlockMapping::Part(ContentPart::Reasoning {
            text: String::new(),
            signature: None,
            encrypted: Some(data.clone()),
        }),
        ContentBlock::Document { .. } => {
            warnings.push("document block dropped (unsupported)".to_string());
            BlockMapping::Dropped
        }
    }
}

fn unified_to_block(part: &ContentPart) -> Option<JsonValue> {
    match part {
        ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentPart::ToolCall {
            id,
            name,
            arguments,
        } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": arguments,
        })),
        ContentPart::ToolResult {
            call_id,
            output,
            is_error,
            ..
        } => {
            let mut block = Map::new();
            block.insert("type".into(), json!("tool_result"));
            block.insert("tool_use_id".into(), json!(call_id));
            block.insert("content".into(), json!(output.to_plain_text()));
            if *is_error {
                block.insert("is_error".into(), json!(true));
            }
            Some(JsonValue::Object(block))
        }
        ContentPart::File {
            media_type, data, url, ..
        } => {
            let source = if let Some(data) = data {
                json!({
                    "type": "base64",
                    "media_type": media_type.as_deref().unwrap_or("image/png"),
                    "data": data,
                })
            } else {
                json!({ "type": "url", "url": url })
            };
            Some(json!({ "type": "image", "source": source }))
        }
        ContentPart::Reasoning {
            text,
            signature,
            encrypted,
        } => {
            // Without a verifiable signature this wire only accepts the
            // redacted form; base64 of the text (or the encrypted blob).
            match (signature, encrypted) {
                (Some(signature), _) => Some(json!({
                    "type": "thinking",
                    "thinking": text,
                    "signature": signature,
                })),
                (None, Some(encrypted)) => Some(json!({
                    "type": "redacted_thinking",
                    "data": encrypted,
                })),
                (None, None) => Some(json!({
                    "type": "redacted_thinking",
                    "data": BASE64.encode(text),
                })),
            }
        }
    }
}

fn merge_or_push(messages: &mut Vec<JsonValue>, role: &str, blocks: Vec<JsonValue>) {
    // Consecutive same-role turns are not allowed on this wire; merge them.
    if let Some(last) = messages.last_mut() {
        if last.get("role").and_then(|r| r.as_str()) == Some(role) {
            if let Some(content) = last.get_mut("content").and_then(|c| c.as_array_mut()) {
                content.extend(blocks);
                return;
            }
        }
    }
    messages.push(json!({ "role": role, "content": blocks }));
}

fn render_user_blocks(message: &UnifiedMessage) -> Vec<JsonValue> {
    let mut blocks = Vec::new();
    for part in &message.parts {
        match part {
            ContentPart::Text { .. } | ContentPart::File { .. } | ContentPart::ToolResult { .. } => {
                if let Some(block) = unified_to_block(part) {
                    blocks.push(block);
                }
            }
            _ => {}
        }
    }
    blocks
}

fn render_assistant_blocks(message: &UnifiedMessage) -> Vec<JsonValue> {
    let mut blocks = Vec::new();
    for part in &message.parts {
        match part {
            ContentPart::Text { .. }
            | ContentPart::ToolCall { .. }
            | ContentPart::Reasoning { .. } => {
                if let Some(block) = unified_to_block(part) {
                    blocks.push(block);
                }
            }
            _ => {}
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_extracts_system_and_tool_results() {
        let raw = br#"{
            "model": "claude-sonnet",
            "max_tokens": 512,
            "system": "be terse",
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "{\"ok\":true}"},
                    {"type": "text", "text": "continue"}
                ]}
            ]
        }"#;
        let unified = AnthropicTransformer.parse_request(raw).unwrap();
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[1].role, Role::Tool);
        assert_eq!(unified.messages[2].role, Role::User);
        assert_eq!(unified.params.max_output_tokens, Some(512));
    }

    #[test]
    fn render_request_merges_consecutive_user_turns() {
        let mut request = UnifiedRequest::default();
        request.model = "claude".into();
        request.messages = vec![
            UnifiedMessage {
                role: Role::Tool,
                parts: vec![ContentPart::ToolResult {
                    call_id: "t1".into(),
                    name: None,
                    output: ToolOutput::Text("4".into()),
                    is_error: false,
                }],
            },
            UnifiedMessage::text(Role::User, "next"),
        ];
        let body = AnthropicTransformer.render_request(&request).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "tool_result");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn reasoning_without_signature_renders_redacted() {
        let response = CompletedResponse {
            id: "m1".into(),
            model: "claude".into(),
            parts: vec![ContentPart::Reasoning {
                text: "secret plan".into(),
                signature: None,
                encrypted: None,
            }],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            warnings: Vec::new(),
            plexus: None,
        };
        let body = AnthropicTransformer.render_response(&response).unwrap();
        assert_eq!(body["content"][0]["type"], "redacted_thinking");
        assert!(body["content"][0]["data"].as_str().unwrap().len() > 0);
    }

    #[test]
    fn stop_reason_table() {
        assert_eq!(parse_stop_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(parse_stop_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(parse_stop_reason(Some("tool_use")), FinishReason::ToolCalls);
        assert_eq!(render_stop_reason(FinishReason::ToolCalls), "tool_use");
        assert_eq!(render_stop_reason(FinishReason::Error), "error");
    }

}
