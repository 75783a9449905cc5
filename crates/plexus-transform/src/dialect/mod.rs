pub mod anthropic;
pub mod embeddings;
pub mod gemini;
pub mod images;
pub mod openai_chat;
pub mod openai_responses;
pub mod speech;

use serde_json::Value as JsonValue;

use crate::unified::{ToolDefinition, parse_tool_arguments};

/// Decode a wire argument string for a named tool. The declared schema
/// decides whether a JSON string should be parsed into an object.
pub(crate) fn wire_arguments(
    name: &str,
    raw: &str,
    tools: &[ToolDefinition],
    warnings: &mut Vec<String>,
) -> JsonValue {
    let expects_object = tools
        .iter()
        .find(|tool| tool.name == name)
        .is_none_or(ToolDefinition::expects_object_arguments);
    if expects_object {
        parse_tool_arguments(raw, warnings)
    } else {
        JsonValue::String(raw.to_string())
    }
}

/// Encode unified arguments back to the wire string form.
pub(crate) fn arguments_to_wire_string(arguments: &JsonValue) -> String {
    // `{"_raw": "..."}` round-trips back to the original broken string.
    if let Some(raw) = arguments.get("_raw").and_then(|v| v.as_str()) {
        return raw.to_string();
    }
    if let JsonValue::String(s) = arguments {
        return s.clone();
    }
    arguments.to_string()
}
