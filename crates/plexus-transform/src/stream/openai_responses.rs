//! OpenAI Responses stream codec.

use bytes::Bytes;
use serde_json::{Value as JsonValue, json};

use plexus_protocol::openai::responses::{ResponseItem, ResponsesStreamEvent};
use plexus_protocol::sse::{SseFrame, done_frame};

use super::{StreamDecoder, StreamDelta, StreamEncoder};
use crate::unified::{FinishReason, TokenUsage};

#[derive(Default)]
pub struct ResponsesStreamDecoder {
    started: bool,
    /// Wire item ids of open function calls, in output order.
    call_items: Vec<String>,
}

impl ResponsesStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn call_index(&mut self, item_id: &str) -> u32 {
        match self.call_items.iter().position(|id| id == item_id) {
            Some(index) => index as u32,
            None => {
                self.call_items.push(item_id.to_string());
                (self.call_items.len() - 1) as u32
            }
        }
    }
}

fn usage_from_response(value: &JsonValue) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    Some(TokenUsage {
        input_tokens: usage.get("input_tokens")?.as_u64().unwrap_or(0),
        output_tokens: usage.get("output_tokens")?.as_u64().unwrap_or(0),
        cached_tokens: usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(JsonValue::as_u64),
        reasoning_tokens: usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(JsonValue::as_u64),
    })
}

impl StreamDecoder for ResponsesStreamDecoder {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        if frame.is_done_marker() {
            return vec![StreamDelta::Done];
        }
        let Ok(event) = serde_json::from_str::<ResponsesStreamEvent>(&frame.data) else {
            return Vec::new();
        };
        match event {
            ResponsesStreamEvent::Created { response } => {
                if self.started {
                    return Vec::new();
                }
                self.started = true;
                vec![StreamDelta::Start {
                    id: response.id,
                    model: response.model,
                }]
            }
            ResponsesStreamEvent::OutputItemAdded { item, .. } => match item {
                ResponseItem::FunctionCall {
                    id,
                    call_id,
                    name,
                    ..
                } => {
                    let item_id = id.unwrap_or_else(|| call_id.clone());
                    let index = self.call_index(&item_id);
                    vec![StreamDelta::ToolCallStart {
                        index,
                        id: call_id,
                        name,
                    }]
                }
                _ => Vec::new(),
            },
            ResponsesStreamEvent::OutputTextDelta { delta, .. } => {
                vec![StreamDelta::TextDelta(delta)]
            }
            ResponsesStreamEvent::ReasoningSummaryTextDelta { delta, .. } => {
                vec![StreamDelta::ReasoningDelta(delta)]
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let index = self.call_index(&item_id);
                vec![StreamDelta::ToolCallDelta {
                    index,
                    arguments: delta,
                }]
            }
            ResponsesStreamEvent::Completed { response } => {
                let value = serde_json::to_value(&response).unwrap_or_default();
                let mut deltas = Vec::new();
                let finish = if self.call_items.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                };
                deltas.push(StreamDelta::Finish(finish));
                if let Some(usage) = usage_from_response(&value) {
                    deltas.push(StreamDelta::Usage(usage));
                }
                deltas.push(StreamDelta::Done);
                deltas
            }
            ResponsesStreamEvent::Failed { .. } => {
                vec![StreamDelta::Finish(FinishReason::Error), StreamDelta::Done]
            }
            ResponsesStreamEvent::OutputTextDone { .. }
            | ResponsesStreamEvent::FunctionCallArgumentsDone { .. }
            | ResponsesStreamEvent::OutputItemDone { .. }
            | ResponsesStreamEvent::Other(_) => Vec::new(),
        }
    }
}

pub struct ResponsesStreamEncoder {
    id: String,
    model: String,
    started: bool,
    completed: bool,
    output_index: u32,
    text_open: bool,
    text_buffer: String,
    open_calls: Vec<(u32, String, String, String)>,
    finish_reason: FinishReason,
    usage: TokenUsage,
}

impl ResponsesStreamEncoder {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            started: false,
            completed: false,
            output_index: 0,
            text_open: false,
            text_buffer: String::new(),
            open_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        }
    }

    fn named(event: &str, body: JsonValue) -> Bytes {
        SseFrame::named(event, body.to_string()).encode()
    }

    fn response_value(&self, status: &str) -> JsonValue {
        json!({
            "id": self.id,
            "object": "response",
            "status": status,
            "model": self.model,
            "output": [],
            "usage": {
                "input_tokens": self.usage.input_tokens,
                "output_tokens": self.usage.output_tokens,
                "total_tokens": self.usage.input_tokens + self.usage.output_tokens,
            },
        })
    }

    fn start_frames(&mut self) -> Vec<Bytes> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![Self::named(
            "response.created",
            json!({ "type": "response.created", "response": self.response_value("in_progress") }),
        )]
    }

    fn ensure_text_item(&mut self, out: &mut Vec<Bytes>) -> u32 {
        if self.text_open {
            return self.output_index;
        }
        self.text_open = true;
        self.output_index += 1;
        let index = self.output_index;
        out.push(Self::named(
            "response.output_item.added",
            json!({
                "type": "response.output_item.added",
                "output_index": index,
                "item": {
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "id": format!("msg_{index}"),
                    "status": "in_progress",
                },
            }),
        ));
        index
    }
}

impl StreamEncoder for ResponsesStreamEncoder {
    fn encode(&mut self, delta: &StreamDelta) -> Vec<Bytes> {
        let mut out = Vec::new();
        match delta {
            StreamDelta::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
                out.extend(self.start_frames());
            }
            StreamDelta::TextDelta(text) => {
                out.extend(self.start_frames());
                let index = self.ensure_text_item(&mut out);
                self.text_buffer.push_str(text);
                out.push(Self::named(
                    "response.output_text.delta",
                    json!({
                        "type": "response.output_text.delta",
                        "item_id": format!("msg_{index}"),
                        "output_index": index,
                        "content_index": 0,
                        "delta": text,
                    }),
                ));
            }
            StreamDelta::ReasoningDelta(text) => {
                out.extend(self.start_frames());
                out.push(Self::named(
                    "response.reasoning_summary_text.delta",
                    json!({
                        "type": "response.reasoning_summary_text.delta",
                        "item_id": "rs_0",
                        "output_index": 0,
                        "delta": text,
                    }),
                ));
            }
            StreamDelta::ToolCallStart { index, id, name } => {
                out.extend(self.start_frames());
                self.output_index += 1;
                let item_id = format!("fc_{index}");
                self.open_calls
                    .push((*index, item_id.clone(), id.clone(), String::new()));
                out.push(Self::named(
                    "response.output_item.added",
                    json!({
                        "type": "response.output_item.added",
                        "output_index": self.output_index,
                        "item": {
                            "type": "function_call",
                            "id": item_id,
                            "call_id": id,
                            "name": name,
                            "arguments": "",
                            "status": "in_progress",
                        },
                    }),
                ));
            }
            StreamDelta::ToolCallDelta { index, arguments } => {
                if let Some((_, item_id, _, buffer)) =
                    self.open_calls.iter_mut().find(|(i, ..)| i == index)
                {
                    buffer.push_str(arguments);
                    let item_id = item_id.clone();
                    out.push(Self::named(
                        "response.function_call_arguments.delta",
                        json!({
                            "type": "response.function_call_arguments.delta",
                            "item_id": item_id,
                            "output_index": self.output_index,
                            "delta": arguments,
                        }),
                    ));
                }
            }
            StreamDelta::Finish(reason) => {
                self.finish_reason = *reason;
            }
            StreamDelta::Usage(usage) => {
                self.usage.merge(usage);
            }
            StreamDelta::Done => {
                out.extend(self.terminal_frames());
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        self.terminal_frames()
    }
}

impl ResponsesStreamEncoder {
    fn terminal_frames(&mut self) -> Vec<Bytes> {
        if self.completed {
            return Vec::new();
        }
        self.completed = true;
        let mut out = self.start_frames();

        if self.text_open {
            let index = self.output_index;
            out.push(Self::named(
                "response.output_text.done",
                json!({
                    "type": "response.output_text.done",
                    "item_id": format!("msg_{index}"),
                    "output_index": index,
                    "content_index": 0,
                    "text": self.text_buffer,
                }),
            ));
        }
        for (_, item_id, _call_id, arguments) in std::mem::take(&mut self.open_calls) {
            out.push(Self::named(
                "response.function_call_arguments.done",
                json!({
                    "type": "response.function_call_arguments.done",
                    "item_id": item_id,
                    "output_index": self.output_index,
                    "arguments": arguments,
                }),
            ));
        }

        let (event, status) = if self.finish_reason == FinishReason::Error {
            ("response.failed", "failed")
        } else {
            ("response.completed", "completed")
        };
        out.push(Self::named(
            event,
            json!({ "type": event, "response": self.response_value(status) }),
        ));
        out.push(done_frame());
        out
    }
}
