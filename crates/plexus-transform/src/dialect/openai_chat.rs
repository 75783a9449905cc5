//! OpenAI chat completions ↔ unified.

use serde_json::{Map, Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::openai::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatContentPart, ChatToolChoice,
};

use super::{arguments_to_wire_string, wire_arguments};
use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, ContentPart, FinishReason, GenerationParams, Role, TokenUsage, ToolChoice,
    ToolDefinition, ToolOutput, TransformError, UnifiedMessage, UnifiedRequest,
};

pub struct OpenAiChatTransformer;

pub(crate) fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        None => FinishReason::Stop,
        Some(_) => FinishReason::Other,
    }
}

pub(crate) fn render_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        // Chat has no error finish; surface as a normal stop.
        FinishReason::Error => "stop",
        FinishReason::Other => "stop",
    }
}

impl DialectTransformer for OpenAiChatTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Chat
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: ChatCompletionRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        let mut unified = UnifiedRequest {
            model: wire.model.clone(),
            stream: wire.stream.unwrap_or(false),
            include_usage: wire
                .stream_options
                .as_ref()
                .and_then(|o| o.include_usage)
                .unwrap_or(false),
            incoming_api_type: Some(ApiType::Chat),
            response_format: wire.response_format.clone(),
            metadata: wire.metadata.clone(),
            original_body: Some(original),
            ..Default::default()
        };

        unified.params = GenerationParams {
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: None,
            max_output_tokens: wire.max_completion_tokens.or(wire.max_tokens),
            stop: wire.stop.clone().map(|s| s.into_vec()).unwrap_or_default(),
            seed: wire.seed,
            presence_penalty: wire.presence_penalty,
            frequency_penalty: wire.frequency_penalty,
        };

        if let Some(tools) = &wire.tools {
            for tool in tools {
                unified.tools.push(ToolDefinition {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    parameters: tool.function.parameters.clone(),
                });
            }
        }
        unified.tool_choice = wire.tool_choice.as_ref().map(|choice| match choice {
            ChatToolChoice::Mode(mode) => match mode.as_str() {
                "none" => ToolChoice::None,
                "required" => ToolChoice::Required,
                _ => ToolChoice::Auto,
            },
            ChatToolChoice::Named { function, .. } => ToolChoice::Tool(function.name.clone()),
        });

        for message in &wire.messages {
            let role = match message.role.as_str() {
                "system" => Role::System,
                "developer" => {
                    unified.warn("developer role mapped to system");
                    Role::System
                }
                "assistant" => Role::Assistant,
                "tool" => Role::Tool,
                _ => Role::User,
            };

            let mut parts = Vec::new();
            if role == Role::Tool {
                let output = match &message.content {
                    Some(ChatContent::Text(text)) => ToolOutput::from_wire_string(text),
                    Some(ChatContent::Parts(wire_parts)) => {
                        ToolOutput::Content(content_parts_to_unified(
                            wire_parts,
                            &mut unified.warnings,
                        ))
                    }
                    None => ToolOutput::Text(String::new()),
                };
                parts.push(ContentPart::ToolResult {
                    call_id: message.tool_call_id.clone().unwrap_or_default(),
                    name: message.name.clone(),
                    output,
                    is_error: false,
                });
            } else {
                match &message.content {
                    Some(ChatContent::Text(text)) => {
                        parts.push(ContentPart::Text { text: text.clone() })
                    }
                    Some(ChatContent::Parts(wire_parts)) => {
                        parts.extend(content_parts_to_unified(wire_parts, &mut unified.warnings))
                    }
                    None => {}
                }
                if let Some(reasoning) = &message.reasoning_content {
                    parts.push(ContentPart::Reasoning {
                        text: reasoning.clone(),
                        signature: None,
                        encrypted: None,
                    });
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        let arguments = wire_arguments(
                            &call.function.name,
                            &call.function.arguments,
                            &unified.tools,
                            &mut unified.warnings,
                        );
                        parts.push(ContentPart::ToolCall {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            arguments,
                        });
                    }
                }
            }
            unified.messages.push(UnifiedMessage { role, parts });
        }

        Ok(unified)
    }

    fn render_request(&self, request: &UnifiedRequest) -> Result<JsonValue, TransformError> {
        let mut messages = Vec::new();
        for message in &request.messages {
            messages.extend(render_message(message));
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), json!(messages));

        if let Some(value) = request.params.temperature {
            body.insert("temperature".into(), json!(value));
        }
        if let Some(value) = request.params.top_p {
            body.insert("top_p".into(), json!(value));
        }
        if let Some(value) = request.params.max_output_tokens {
            body.insert("max_tokens".into(), json!(value));
        }
        if !request.params.stop.is_empty() {
            body.insert("stop".into(), json!(request.params.stop));
        }
        if let Some(value) = request.params.seed {
            body.insert("seed".into(), json!(value));
        }
        if let Some(value) = request.params.presence_penalty {
            body.insert("presence_penalty".into(), json!(value));
        }
        if let Some(value) = request.params.frequency_penalty {
            body.insert("frequency_penalty".into(), json!(value));
        }
        if let Some(format) = &request.response_format {
            body.insert("response_format".into(), format.clone());
        }
        if request.stream {
            body.insert("stream".into(), json!(true));
            if request.include_usage {
                body.insert("stream_options".into(), json!({ "include_usage": true }));
            }
        }
        if !request.tools.is_empty() {
            let tools: Vec<JsonValue> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), json!(tools));
        }
        if let Some(choice) = &request.tool_choice {
            let value = match choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Tool(name) => {
                    json!({ "type": "function", "function": { "name": name } })
                }
            };
            body.insert("tool_choice".into(), value);
        }

        Ok(JsonValue::Object(body))
    }

    fn parse_response(
        &self,
        raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        let wire: ChatCompletionResponse = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;

        let mut warnings = Vec::new();
        let mut parts = Vec::new();
        let mut finish_reason = FinishReason::Stop;

        if let Some(choice) = wire.choices.first() {
            finish_reason = parse_finish_reason(choice.finish_reason.as_deref());
            if let Some(reasoning) = &choice.message.reasoning_content {
                parts.push(ContentPart::Reasoning {
                    text: reasoning.clone(),
                    signature: None,
                    encrypted: None,
                });
            }
            if let Some(content) = &choice.message.content {
                if !content.is_empty() {
                    parts.push(ContentPart::Text {
                        text: content.clone(),
                    });
                }
            }
            if let Some(calls) = &choice.message.tool_calls {
                for call in calls {
                    let arguments = wire_arguments(
                        &call.function.name,
                        &call.function.arguments,
                        &request.tools,
                        &mut warnings,
                    );
                    parts.push(ContentPart::ToolCall {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments,
                    });
                }
            }
        }

        let usage = wire
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                cached_tokens: u
                    .prompt_tokens_details
                    .as_ref()
                    .and_then(|d| d.cached_tokens),
                reasoning_tokens: u
                    .completion_tokens_details
                    .as_ref()
                    .and_then(|d| d.reasoning_tokens),
            })
            .unwrap_or_default();

        Ok(CompletedResponse {
            id: wire.id,
            model: wire.model,
            parts,
            finish_reason,
            usage,
            warnings,
            plexus: None,
        })
    }

    fn render_response(&self, response: &CompletedResponse) -> Result<JsonValue, TransformError> {
        let text = response.text();
        let tool_calls: Vec<JsonValue> = response
            .tool_calls()
            .map(|(id, name, arguments)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": arguments_to_wire_string(arguments),
                    }
                })
            })
            .collect();

        let mut message = Map::new();
        message.insert("role".into(), json!("assistant"));
        message.insert(
            "content".into(),
            if text.is_empty() { JsonValue::Null } else { json!(text) },
        );
        if !tool_calls.is_empty() {
            message.insert("tool_calls".into(), json!(tool_calls));
        }

        let usage = json!({
            "prompt_tokens": response.usage.input_tokens,
            "completion_tokens": response.usage.output_tokens,
            "total_tokens": response.usage.input_tokens + response.usage.output_tokens,
        });

        let mut body = Map::new();
        body.insert("id".into(), json!(response.id));
        body.insert("object".into(), json!("chat.completion"));
        body.insert(
            "created".into(),
            json!(time::OffsetDateTime::now_utc().unix_timestamp()),
        );
        body.insert("model".into(), json!(response.model));
        body.insert(
            "choices".into(),
            json!([{
                "index": 0,
                "message": message,
                "finish_reason": render_finish_reason(response.finish_reason),
            }]),
        );
        body.insert("usage".into(), usage);
        if let Some(meta) = &response.plexus {
            if let Ok(value) = serde_json::to_value(meta) {
                body.insert("plexus".into(), value);
            }
        }
        Ok(JsonValue::Object(body))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/chat/completions".to_string()
    }
}

fn render_message(message: &UnifiedMessage) -> Vec<JsonValue> {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if message.role == Role::Tool {
        return message
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult {
                    call_id, output, ..
                } => Some(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output.to_plain_text(),
                })),
                _ => None,
            })
            .collect();
    }

    let mut text_parts: Vec<JsonValue> = Vec::new();
    let mut plain_text = String::new();
    let mut only_text = true;
    let mut tool_calls: Vec<JsonValue> = Vec::new();
    let mut reasoning: Option<String> = None;

    for part in &message.parts {
        match part {
            ContentPart::Text { text } => {
                plain_text.push_str(text);
                text_parts.push(json!({ "type": "text", "text": text }));
            }
            ContentPart::File {
                url, data, media_type, ..
            } => {
                only_text = false;
                let resolved = url.clone().or_else(|| {
                    data.as_ref().map(|d| {
                        format!(
                            "data:{};base64,{}",
                            media_type.as_deref().unwrap_or("application/octet-stream"),
                            d
                        )
                    })
                });
                if let Some(resolved) = resolved {
                    text_parts.push(json!({ "type": "image_url", "image_url": { "url": resolved } }));
                }
            }
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": arguments_to_wire_string(arguments),
                    }
                }));
            }
            ContentPart::Reasoning { text, .. } => {
                reasoning = Some(text.clone());
            }
            ContentPart::ToolResult { .. } => {}
        }
    }

    let content = if only_text {
        if plain_text.is_empty() {
            JsonValue::Null
        } else {
            json!(plain_text)
        }
    } else {
        json!(text_parts)
    };

    let mut rendered = Map::new();
    rendered.insert("role".into(), json!(role));
    rendered.insert("content".into(), content);
    if !tool_calls.is_empty() {
        rendered.insert("tool_calls".into(), json!(tool_calls));
    }
    if let Some(reasoning) = reasoning {
        rendered.insert("reasoning_content".into(), json!(reasoning));
    }
    vec![JsonValue::Object(rendered)]
}

fn content_parts_to_unified(
    wire_parts: &[ChatContentPart],
    warnings: &mut Vec<String>,
) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    for part in wire_parts {
        match part {
            ChatContentPart::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ChatContentPart::ImageUrl { image_url } => parts.push(ContentPart::File {
                media_type: None,
                data: None,
                url: Some(image_url.url.clone()),
            }),
            ChatContentPart::File { file } => parts.push(ContentPart::File {
                media_type: None,
                data: file.file_data.clone(),
                url: None,
            }),
            ChatContentPart::InputAudio { .. } => {
                warnings.push("input_audio part dropped (unsupported)".to_string());
            }
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> OpenAiChatTransformer {
        OpenAiChatTransformer
    }

    #[test]
    fn parse_basic_request() {
        let raw = br#"{
            "model": "default",
            "messages": [
                {"role": "developer", "content": "rules"},
                {"role": "user", "content": "hi"}
            ],
            "stream": true,
            "stream_options": {"include_usage": true},
            "max_completion_tokens": 256
        }"#;
        let unified = transformer().parse_request(raw).unwrap();
        assert_eq!(unified.model, "default");
        assert!(unified.stream);
        assert!(unified.include_usage);
        assert_eq!(unified.params.max_output_tokens, Some(256));
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.warnings.len(), 1);
        assert!(unified.original_body.is_some());
    }

    #[test]
    fn tool_round_trip() {
        let raw = br#"{
            "model": "default",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "{\"temp\": -3}"}
            ],
            "tools": [{"type": "function", "function": {"name": "get_weather",
                       "parameters": {"type": "object"}}}]
        }"#;
        let unified = transformer().parse_request(raw).unwrap();
        let assistant = &unified.messages[1];
        match &assistant.parts[0] {
            ContentPart::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "get_weather");
                assert_eq!(arguments["city"], "Oslo");
            }
            other => panic!("unexpected part: {other:?}"),
        }
        match &unified.messages[2].parts[0] {
            ContentPart::ToolResult { output, .. } => {
                assert!(matches!(output, ToolOutput::Json(_)));
            }
            other => panic!("unexpected part: {other:?}"),
        }

        let rendered = transformer().render_request(&unified).unwrap();
        assert_eq!(
            rendered["messages"][1]["tool_calls"][0]["function"]["arguments"],
            "{\"city\":\"Oslo\"}"
        );
        assert_eq!(rendered["messages"][2]["role"], "tool");
    }

    #[test]
    fn parse_response_maps_finish_and_usage() {
        let raw = br#"{
            "id": "chatcmpl-1", "object": "chat.completion", "created": 0,
            "model": "m",
            "choices": [{"index": 0, "finish_reason": "tool_calls",
                "message": {"role": "assistant", "content": null,
                    "tool_calls": [{"id": "c", "type": "function",
                        "function": {"name": "f", "arguments": "{}"}}]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30,
                "prompt_tokens_details": {"cached_tokens": 4}}
        }"#;
        let response = transformer()
            .parse_response(raw, &UnifiedRequest::default())
            .unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 20);
        assert_eq!(response.usage.cached_tokens, Some(4));
        assert_eq!(response.tool_calls().count(), 1);
    }

    #[test]
    fn render_response_shape() {
        let response = CompletedResponse {
            id: "r1".into(),
            model: "m".into(),
            parts: vec![ContentPart::Text { text: "ok".into() }],
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                input_tokens: 1,
                output_tokens: 2,
                cached_tokens: None,
                reasoning_tokens: None,
            },
            warnings: Vec::new(),
            plexus: None,
        };
        let body = transformer().render_response(&response).unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "ok");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 3);
    }
}
