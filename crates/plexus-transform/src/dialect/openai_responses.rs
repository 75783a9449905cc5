//! OpenAI Responses ↔ unified.

use serde_json::{Map, Value as JsonValue, json};

use plexus_common::ApiType;
use plexus_protocol::openai::responses::{
    MessageContent, ResponseContentPart, ResponseItem, ResponsesInput, ResponsesRequest,
    ResponsesResponse,
};

use super::{arguments_to_wire_string, wire_arguments};
use crate::registry::DialectTransformer;
use crate::unified::{
    CompletedResponse, ContentPart, FinishReason, GenerationParams, Role, TokenUsage, ToolChoice,
    ToolDefinition, ToolOutput, TransformError, UnifiedMessage, UnifiedRequest,
};

pub struct OpenAiResponsesTransformer;

fn parse_status(status: Option<&str>, incomplete_reason: Option<&str>) -> FinishReason {
    match (status, incomplete_reason) {
        (Some("completed"), _) | (None, _) => FinishReason::Stop,
        (Some("incomplete"), Some("max_output_tokens")) => FinishReason::Length,
        (Some("incomplete"), Some("content_filter")) => FinishReason::ContentFilter,
        (Some("incomplete"), _) => FinishReason::Other,
        (Some("failed"), _) => FinishReason::Error,
        (Some(_), _) => FinishReason::Other,
    }
}

fn render_status(reason: FinishReason) -> (&'static str, Option<&'static str>) {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls => ("completed", None),
        FinishReason::Length => ("incomplete", Some("max_output_tokens")),
        FinishReason::ContentFilter => ("incomplete", Some("content_filter")),
        FinishReason::Error => ("failed", None),
        FinishReason::Other => ("completed", None),
    }
}

impl DialectTransformer for OpenAiResponsesTransformer {
    fn api_type(&self) -> ApiType {
        ApiType::Responses
    }

    fn parse_request(&self, raw: &[u8]) -> Result<UnifiedRequest, TransformError> {
        let original: JsonValue = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;
        let wire: ResponsesRequest = serde_json::from_value(original.clone())
            .map_err(|err| TransformError::InvalidRequest(err.to_string()))?;

        let mut unified = UnifiedRequest {
            model: wire.model.clone(),
            stream: wire.stream.unwrap_or(false),
            incoming_api_type: Some(ApiType::Responses),
            metadata: wire.metadata.clone(),
            response_format: wire.text.clone(),
            original_body: Some(original),
            ..Default::default()
        };

        unified.params = GenerationParams {
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: None,
            max_output_tokens: wire.max_output_tokens,
            stop: Vec::new(),
            seed: None,
            presence_penalty: None,
            frequency_penalty: None,
        };

        if wire.previous_response_id.is_some() {
            unified.warn("previous_response_id dropped (no response store)");
        }

        if let Some(instructions) = &wire.instructions {
            unified
                .messages
                .push(UnifiedMessage::text(Role::System, instructions.clone()));
        }

        if let Some(tools) = &wire.tools {
            for tool in tools {
                if tool.kind != "function" {
                    unified.warn(format!("tool type `{}` dropped (unsupported)", tool.kind));
                    continue;
                }
                unified.tools.push(ToolDefinition {
                    name: tool.name.clone().unwrap_or_default(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                });
            }
        }
        unified.tool_choice = wire.tool_choice.as_ref().and_then(|choice| match choice {
            JsonValue::String(mode) => Some(match mode.as_str() {
                "none" => ToolChoice::None,
                "required" => ToolChoice::Required,
                _ => ToolChoice::Auto,
            }),
            JsonValue::Object(object) => object
                .get("name")
                .and_then(|n| n.as_str())
                .map(|name| ToolChoice::Tool(name.to_string())),
            _ => None,
        });

        match &wire.input {
            ResponsesInput::Text(text) => unified
                .messages
                .push(UnifiedMessage::text(Role::User, text.clone())),
            ResponsesInput::Items(items) => {
                for item in items {
                    parse_item(item, &mut unified);
                }
            }
        }

        Ok(unified)
    }

    fn render_request(&self, request: &UnifiedRequest) -> Result<JsonValue, TransformError> {
        let mut instructions: Vec<String> = Vec::new();
        let mut input: Vec<JsonValue> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System => {
                    for part in &message.parts {
                        if let ContentPart::Text { text } = part {
                            instructions.push(text.clone());
                        }
                    }
                }
                Role::User => {
                    let content = render_input_content(&message.parts);
                    if !content.is_empty() {
                        input.push(json!({
                            "type": "message",
                            "role": "user",
                            "content": content,
                        }));
                    }
                }
                Role::Assistant => render_assistant_items(&message.parts, &mut input),
                Role::Tool => {
                    for part in &message.parts {
                        if let ContentPart::ToolResult {
                            call_id, output, ..
                        } = part
                        {
                            input.push(json!({
                                "type": "function_call_output",
                                "call_id": call_id,
                                "output": output.to_plain_text(),
                            }));
                        }
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("input".into(), json!(input));
        if !instructions.is_empty() {
            body.insert("instructions".into(), json!(instructions.join("\n")));
        }
        if let Some(value) = request.params.temperature {
            body.insert("temperature".into(), json!(value));
        }
        if let Some(value) = request.params.top_p {
            body.insert("top_p".into(), json!(value));
        }
        if let Some(value) = request.params.max_output_tokens {
            body.insert("max_output_tokens".into(), json!(value));
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
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
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
                ToolChoice::Tool(name) => json!({ "type": "function", "name": name }),
            };
            body.insert("tool_choice".into(), value);
        }
        // Stateless relay: never ask the upstream to persist responses.
        body.insert("store".into(), json!(false));

        Ok(JsonValue::Object(body))
    }

    fn parse_response(
        &self,
        raw: &[u8],
        request: &UnifiedRequest,
    ) -> Result<CompletedResponse, TransformError> {
        let wire: ResponsesResponse = serde_json::from_slice(raw)
            .map_err(|err| TransformError::InvalidResponse(err.to_string()))?;

        let mut warnings = Vec::new();
        let mut parts = Vec::new();
        let mut saw_tool_call = false;
        for item in &wire.output {
            match item {
                ResponseItem::Message { content, .. } => match content {
                    MessageContent::Text(text) => {
                        parts.push(ContentPart::Text { text: text.clone() })
                    }
                    MessageContent::Parts(wire_parts) => {
                        for part in wire_parts {
                            match part {
                                ResponseContentPart::OutputText { text, .. }
                                | ResponseContentPart::InputText { text } => {
                                    parts.push(ContentPart::Text { text: text.clone() })
                                }
                                ResponseContentPart::Refusal { refusal } => {
                                    parts.push(ContentPart::Text {
                                        text: refusal.clone(),
                                    });
                                }
                                _ => {}
                            }
                        }
                    }
                },
                ResponseItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                    ..
                } => {
                    saw_tool_call = true;
                    let parsed =
                        wire_arguments(name, arguments, &request.tools, &mut warnings);
                    parts.push(ContentPart::ToolCall {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments: parsed,
                    });
                }
                ResponseItem::Reasoning {
                    summary,
                    encrypted_content,
                    ..
                } => {
                    if encrypted_content.is_some() && summary.is_empty() {
                        warnings
                            .push("encrypted reasoning dropped (no summary available)".to_string());
                        continue;
                    }
                    let text = summary
                        .iter()
                        .map(|p| p.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    parts.push(ContentPart::Reasoning {
                        text,
                        signature: None,
                        encrypted: encrypted_content.clone(),
                    });
                }
                ResponseItem::FunctionCallOutput { .. } => {}
            }
        }

        let incomplete_reason = wire
            .incomplete_details
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str());
        let mut finish_reason = parse_status(wire.status.as_deref(), incomplete_reason);
        if finish_reason == FinishReason::Stop && saw_tool_call {
            finish_reason = FinishReason::ToolCalls;
        }

        let usage = wire
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                cached_tokens: u
                    .input_tokens_details
                    .as_ref()
                    .and_then(|d| d.cached_tokens),
                reasoning_tokens: u
                    .output_tokens_details
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
        let mut output: Vec<JsonValue> = Vec::new();
        render_assistant_output(response, &mut output);

        let (status, incomplete_reason) = render_status(response.finish_reason);
        let mut body = Map::new();
        body.insert("id".into(), json!(response.id));
        body.insert("object".into(), json!("response"));
        body.insert(
            "created_at".into(),
            json!(time::OffsetDateTime::now_utc().unix_timestamp()),
        );
        body.insert("status".into(), json!(status));
        body.insert("model".into(), json!(response.model));
        body.insert("output".into(), json!(output));
        body.insert("output_text".into(), json!(response.text()));
        if let Some(reason) = incomplete_reason {
            body.insert("incomplete_details".into(), json!({ "reason": reason }));
        }
        body.insert(
            "usage".into(),
            json!({
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
                "total_tokens": response.usage.input_tokens + response.usage.output_tokens,
            }),
        );
        if let Some(meta) = &response.plexus {
            if let Ok(value) = serde_json::to_value(meta) {
                body.insert("plexus".into(), value);
            }
        }
        Ok(JsonValue::Object(body))
    }

    fn endpoint(&self, _request: &UnifiedRequest) -> String {
        "/responses".to_string()
    }
}

fn parse_item(item: &ResponseItem, unified: &mut UnifiedRequest) {
    match item {
        ResponseItem::Message { role, content, .. } => {
            let role = match role.as_str() {
                "system" => Role::System,
                "developer" => {
                    unified.warn("developer role mapped to system");
                    Role::System
                }
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            let mut parts = Vec::new();
            match content {
                MessageContent::Text(text) => parts.push(ContentPart::Text { text: text.clone() }),
                MessageContent::Parts(wire_parts) => {
                    for part in wire_parts {
                        match part {
                            ResponseContentPart::InputText { text }
                            | ResponseContentPart::OutputText { text, .. } => {
                                parts.push(ContentPart::Text { text: text.clone() })
                            }
                            ResponseContentPart::InputImage {
                                image_url, ..
                            } => parts.push(ContentPart::File {
                                media_type: None,
                                data: None,
                                url: image_url.clone(),
                            }),
                            ResponseContentPart::InputFile {
                                filename,
                                file_data,
                                ..
                            } => {
                                let _ = filename;
                                parts.push(ContentPart::File {
                                    media_type: None,
                                    data: file_data.clone(),
                                    url: None,
                                });
                            }
                            ResponseContentPart::Refusal { refusal } => {
                                parts.push(ContentPart::Text {
                                    text: refusal.clone(),
                                })
                            }
                        }
                    }
                }
            }
            if !parts.is_empty() {
                unified.messages.push(UnifiedMessage { role, parts });
            }
        }
        ResponseItem::FunctionCall {
            call_id,
            name,
            arguments,
            ..
        } => {
            let tools = unified.tools.clone();
            let parsed = wire_arguments(name, arguments, &tools, &mut unified.warnings);
            unified.messages.push(UnifiedMessage {
                role: Role::Assistant,
                parts: vec![ContentPart::ToolCall {
                    id: call_id.clone(),
                    name: name.clone(),
                    arguments: parsed,
                }],
            });
        }
        ResponseItem::FunctionCallOutput {
            call_id, output, ..
        } => {
            let output = match output {
                JsonValue::String(text) => ToolOutput::from_wire_string(text),
                other => ToolOutput::Json(other.clone()),
            };
            unified.messages.push(UnifiedMessage {
                role: Role::Tool,
                parts: vec![ContentPart::ToolResult {
                    call_id: call_id.clone(),
                    name: None,
                    output,
                    is_error: false,
                }],
            });
        }
        ResponseItem::Reasoning {
            summary,
            encrypted_content,
            ..
        } => {
            if summary.is_empty() && encrypted_content.is_some() {
                unified.warn("encrypted reasoning block dropped");
                return;
            }
            let text = summary
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            unified.messages.push(UnifiedMessage {
                role: Role::Assistant,
                parts: vec![ContentPart::Reasoning {
                    text,
                    signature: None,
                    encrypted: encrypted_content.clone(),
                }],
            });
        }
    }
}

fn render_input_content(parts: &[ContentPart]) -> Vec<JsonValue> {
    let mut content = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => {
                content.push(json!({ "type": "input_text", "text": text }))
            }
            ContentPart::File { url, data, media_type } => {
                if let Some(url) = url {
                    content.push(json!({ "type": "input_image", "image_url": url }));
                } else if let Some(data) = data {
                    content.push(json!({
                        "type": "input_image",
                        "image_url": format!(
                            "data:{};base64,{}",
                            media_type.as_deref().unwrap_or("image/png"),
                            data
                        ),
                    }));
                }
            }
            _ => {}
        }
    }
    content
}

fn render_assistant_items(parts: &[ContentPart], input: &mut Vec<JsonValue>) {
    let mut text = String::new();
    for part in parts {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => input.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": arguments_to_wire_string(arguments),
            })),
            ContentPart::Reasoning { text, encrypted, .. } => {
                let mut item = Map::new();
                item.insert("type".into(), json!("reasoning"));
                item.insert(
                    "summary".into(),
                    json!([{ "type": "summary_text", "text": text }]),
                );
                if let Some(encrypted) = encrypted {
                    item.insert("encrypted_content".into(), json!(encrypted));
                }
                input.push(JsonValue::Object(item));
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        input.push(json!({
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": text }],
        }));
    }
}

fn render_assistant_output(response: &CompletedResponse, output: &mut Vec<JsonValue>) {
    let mut text = String::new();
    for part in &response.parts {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => output.push(json!({
                "type": "function_call",
                "call_id": id,
                "name": name,
                "arguments": arguments_to_wire_string(arguments),
                "status": "completed",
            })),
            ContentPart::Reasoning { text, .. } => output.push(json!({
                "type": "reasoning",
                "summary": [{ "type": "summary_text", "text": text }],
            })),
            _ => {}
        }
    }
    if !text.is_empty() {
        output.push(json!({
            "type": "message",
            "role": "assistant",
            "status": "completed",
            "content": [{ "type": "output_text", "text": text, "annotations": [] }],
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_input_becomes_user_message() {
        let raw = br#"{"model": "gpt-x", "input": "hello", "instructions": "be nice"}"#;
        let unified = OpenAiResponsesTransformer.parse_request(raw).unwrap();
        assert_eq!(unified.messages[0].role, Role::System);
        assert_eq!(unified.messages[1].role, Role::User);
    }

    #[test]
    fn function_items_round_trip() {
        let raw = br#"{
            "model": "gpt-x",
            "input": [
                {"type": "message", "role": "user", "content": "add"},
                {"type": "function_call", "call_id": "c1", "name": "add",
                 "arguments": "{\"a\":1,\"b\":2}"},
                {"type": "function_call_output", "call_id": "c1", "output": "3"}
            ]
        }"#;
        let unified = OpenAiResponsesTransformer.parse_request(raw).unwrap();
        assert_eq!(unified.messages.len(), 3);
        assert_eq!(unified.messages[1].role, Role::Assistant);
        assert_eq!(unified.messages[2].role, Role::Tool);

        let body = OpenAiResponsesTransformer.render_request(&unified).unwrap();
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["arguments"], "{\"a\":1,\"b\":2}");
        assert_eq!(input[2]["type"], "function_call_output");
        assert_eq!(body["store"], false);
    }

    #[test]
    fn encrypted_reasoning_without_summary_is_dropped_with_warning() {
        let raw = br#"{
            "model": "gpt-x",
            "input": [
                {"type": "reasoning", "encrypted_content": "opaque"},
                {"type": "message", "role": "user", "content": "hi"}
            ]
        }"#;
        let unified = OpenAiResponsesTransformer.parse_request(raw).unwrap();
        assert_eq!(unified.messages.len(), 1);
        assert!(unified.warnings.iter().any(|w| w.contains("encrypted")));
    }

    #[test]
    fn parse_response_status_mapping() {
        let raw = br#"{
            "id": "resp_1", "object": "response", "created_at": 0,
            "status": "incomplete", "model": "m",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": [{"type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": "partial"}]}],
            "usage": {"input_tokens": 3, "output_tokens": 9, "total_tokens": 12}
        }"#;
        let response = OpenAiResponsesTransformer
            .parse_response(raw, &UnifiedRequest::default())
            .unwrap();
        assert_eq!(response.finish_reason, FinishReason::Length);
        assert_eq!(response.text(), "partial");
    }
}
