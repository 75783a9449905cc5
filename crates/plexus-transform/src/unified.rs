use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use plexus_common::ApiType;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("dialect {0} cannot express this operation")]
    Unsupported(ApiType),
}

/// Protocol-agnostic request, produced by `parse_request`.
#[derive(Debug, Clone, Default)]
pub struct UnifiedRequest {
    /// Alias name as sent by the client; rewritten to the concrete model
    /// when a target is chosen.
    pub model: String,
    pub messages: Vec<UnifiedMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub params: GenerationParams,
    pub response_format: Option<JsonValue>,
    pub stream: bool,
    /// `stream_options.include_usage` passthrough for OpenAI-style streams.
    pub include_usage: bool,
    pub incoming_api_type: Option<ApiType>,
    /// Original payload, kept for the pass-through fast path.
    pub original_body: Option<JsonValue>,
    pub request_id: Option<String>,
    pub metadata: Option<JsonValue>,
    /// Lossy-conversion notes collected while parsing.
    pub warnings: Vec<String>,
}

impl UnifiedRequest {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Concatenated text of all user/system parts; classifier input.
    pub fn prompt_text(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            for part in &message.parts {
                if let ContentPart::Text { text } = part {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
        }
        out
    }

    /// True when any assistant turn carries tool calls or results exist;
    /// a cheap signal the conversation is agentic.
    pub fn has_tool_traffic(&self) -> bool {
        self.messages.iter().any(|m| {
            m.parts.iter().any(|p| {
                matches!(
                    p,
                    ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. }
                )
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct UnifiedMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl UnifiedMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content, normalized across dialects.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Parsed arguments object. Wire dialects that carry a JSON string
        /// get it parsed; invalid JSON becomes `{"_raw": original}` with a
        /// warning on the request/response.
        arguments: JsonValue,
    },
    ToolResult {
        call_id: String,
        name: Option<String>,
        output: ToolOutput,
        is_error: bool,
    },
    File {
        media_type: Option<String>,
        /// Base64 payload or a URL, whichever the dialect carried.
        data: Option<String>,
        url: Option<String>,
    },
    Reasoning {
        text: String,
        /// Provider verification signature, when the dialect exposes one.
        signature: Option<String>,
        /// Opaque encrypted blob (e.g. Responses `encrypted_content`).
        encrypted: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    /// Output that parsed as structured JSON.
    Json(JsonValue),
    /// Part-by-part mapped content array.
    Content(Vec<ContentPart>),
}

impl ToolOutput {
    /// Normalize a wire string: JSON strings become `Json`, the rest `Text`.
    pub fn from_wire_string(raw: &str) -> ToolOutput {
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(value) if value.is_object() || value.is_array() => ToolOutput::Json(value),
            _ => ToolOutput::Text(raw.to_string()),
        }
    }

    pub fn to_plain_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(value) => value.to_string(),
            ToolOutput::Content(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool(String),
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<JsonValue>,
}

impl ToolDefinition {
    /// Whether the declared schema says arguments are an object; drives
    /// JSON-string parsing of wire arguments.
    pub fn expects_object_arguments(&self) -> bool {
        self.parameters
            .as_ref()
            .and_then(|p| p.get("type"))
            .and_then(|t| t.as_str())
            .is_none_or(|t| t == "object")
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u64>,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
}

/// Closed set of completion causes; each dialect maps through its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl TokenUsage {
    /// Fold in a later report; absolute counters win over zero.
    pub fn merge(&mut self, other: &TokenUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.cached_tokens.is_some() {
            self.cached_tokens = other.cached_tokens;
        }
        if other.reasoning_tokens.is_some() {
            self.reasoning_tokens = other.reasoning_tokens;
        }
    }
}

/// Value copy of provider facts attached to every response. Never a live
/// pointer into mutable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexusMeta {
    pub provider: String,
    pub model: String,
    pub api_type: ApiType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingSnapshot>,
    pub provider_discount: f64,
    /// The alias the client actually asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_per_1m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_per_1m: Option<f64>,
}

/// Protocol-agnostic completed response, produced by `parse_response`.
#[derive(Debug, Clone)]
pub struct CompletedResponse {
    pub id: String,
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub warnings: Vec<String>,
    pub plexus: Option<PlexusMeta>,
}

impl CompletedResponse {
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &JsonValue)> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}

/// Parse a wire tool-call argument string. Invalid JSON is preserved under
/// `_raw` and noted in `warnings`.
pub(crate) fn parse_tool_arguments(raw: &str, warnings: &mut Vec<String>) -> JsonValue {
    if raw.trim().is_empty() {
        return JsonValue::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(value) => value,
        Err(_) => {
            warnings.push(format!(
                "tool call arguments were not valid JSON; preserved raw ({} bytes)",
                raw.len()
            ));
            serde_json::json!({ "_raw": raw })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_tool_arguments_become_raw() {
        let mut warnings = Vec::new();
        let value = parse_tool_arguments("{not json", &mut warnings);
        assert_eq!(value["_raw"], "{not json");
        assert_eq!(warnings.len(), 1);

        let ok = parse_tool_arguments(r#"{"x": 1}"#, &mut warnings);
        assert_eq!(ok["x"], 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn wire_string_tool_output_classification() {
        assert!(matches!(
            ToolOutput::from_wire_string(r#"{"ok": true}"#),
            ToolOutput::Json(_)
        ));
        assert!(matches!(
            ToolOutput::from_wire_string("plain text"),
            ToolOutput::Text(_)
        ));
        // A bare JSON scalar is not structured output.
        assert!(matches!(
            ToolOutput::from_wire_string("42"),
            ToolOutput::Text(_)
        ));
    }

    #[test]
    fn usage_merge_keeps_nonzero() {
        let mut usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 0,
            cached_tokens: None,
            reasoning_tokens: None,
        };
        usage.merge(&TokenUsage {
            input_tokens: 0,
            output_tokens: 25,
            cached_tokens: Some(3),
            reasoning_tokens: None,
        });
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 25);
        assert_eq!(usage.cached_tokens, Some(3));
    }
}
