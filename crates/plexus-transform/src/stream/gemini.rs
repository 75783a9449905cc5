//! Gemini stream codec (SSE framing via `alt=sse`; each data frame is a
//! complete `GenerateContentResponse` chunk).

use bytes::Bytes;
use serde_json::json;

use plexus_protocol::gemini::generate::GenerateContentResponse;
use plexus_protocol::sse::SseFrame;

use super::{StreamDecoder, StreamDelta, StreamEncoder};
use crate::dialect::gemini::{parse_finish_reason, render_finish_reason};
use crate::unified::{FinishReason, TokenUsage};

#[derive(Default)]
pub struct GeminiStreamDecoder {
    started: bool,
    tool_calls_seen: u32,
}

impl GeminiStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for GeminiStreamDecoder {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        let Ok(chunk) = serde_json::from_str::<GenerateContentResponse>(&frame.data) else {
            return Vec::new();
        };

        let mut deltas = Vec::new();
        if !self.started {
            self.started = true;
            deltas.push(StreamDelta::Start {
                id: chunk.response_id.clone().unwrap_or_default(),
                model: chunk.model_version.clone().unwrap_or_default(),
            });
        }
        if let Some(candidate) = chunk.candidates.first() {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(call) = &part.function_call {
                        let index = self.tool_calls_seen;
                        self.tool_calls_seen += 1;
                        deltas.push(StreamDelta::ToolCallStart {
                            index,
                            id: call.name.clone(),
                            name: call.name.clone(),
                        });
                        // Arguments arrive whole on this wire.
                        deltas.push(StreamDelta::ToolCallDelta {
                            index,
                            arguments: call
                                .args
                                .clone()
                                .unwrap_or_else(|| json!({}))
                                .to_string(),
                        });
                    } else if let Some(text) = &part.text {
                        if part.thought.unwrap_or(false) {
                            deltas.push(StreamDelta::ReasoningDelta(text.clone()));
                        } else if !text.is_empty() {
                            deltas.push(StreamDelta::TextDelta(text.clone()));
                        }
                    }
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                let mut reason = parse_finish_reason(Some(reason));
                if reason == FinishReason::Stop && self.tool_calls_seen > 0 {
                    reason = FinishReason::ToolCalls;
                }
                deltas.push(StreamDelta::Finish(reason));
            }
        }
        if let Some(usage) = &chunk.usage_metadata {
            // Counts are cumulative; later chunks supersede earlier ones.
            deltas.push(StreamDelta::Usage(TokenUsage {
                input_tokens: usage.prompt_token_count.unwrap_or(0),
                output_tokens: usage.candidates_token_count.unwrap_or(0),
                cached_tokens: usage.cached_content_token_count,
                reasoning_tokens: usage.thoughts_token_count,
            }));
        }
        deltas
    }

    fn on_end(&mut self) -> Vec<StreamDelta> {
        vec![StreamDelta::Done]
    }
}

pub struct GeminiStreamEncoder {
    model: String,
    id: String,
    finished: bool,
    finish_reason: FinishReason,
    usage: TokenUsage,
    saw_tool_call: bool,
    open_call: Option<(String, String)>,
}

impl GeminiStreamEncoder {
    pub fn new() -> Self {
        Self {
            model: String::new(),
            id: String::new(),
            finished: false,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            saw_tool_call: false,
            open_call: None,
        }
    }

    fn chunk(&self, parts: Vec<serde_json::Value>, finish: Option<&str>) -> Bytes {
        let mut candidate = json!({
            "content": { "role": "model", "parts": parts },
            "index": 0,
        });
        if let Some(finish) = finish {
            if let Some(object) = candidate.as_object_mut() {
                object.insert("finishReason".into(), json!(finish));
            }
        }
        let mut body = json!({ "candidates": [candidate] });
        if let Some(object) = body.as_object_mut() {
            if !self.model.is_empty() {
                object.insert("modelVersion".into(), json!(self.model));
            }
            if !self.id.is_empty() {
                object.insert("responseId".into(), json!(self.id));
            }
        }
        SseFrame::data_only(body.to_string()).encode()
    }

    /// A buffered functionCall is flushed once its arguments are complete.
    fn flush_open_call(&mut self, out: &mut Vec<Bytes>) {
        if let Some((name, arguments)) = self.open_call.take() {
            let args: serde_json::Value =
                serde_json::from_str(&arguments).unwrap_or_else(|_| json!({ "_raw": arguments }));
            out.push(self.chunk(
                vec![json!({ "functionCall": { "name": name, "args": args } })],
                None,
            ));
        }
    }
}

impl StreamEncoder for GeminiStreamEncoder {
    fn encode(&mut self, delta: &StreamDelta) -> Vec<Bytes> {
        let mut out = Vec::new();
        match delta {
            StreamDelta::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            StreamDelta::TextDelta(text) => {
                self.flush_open_call(&mut out);
                out.push(self.chunk(vec![json!({ "text": text })], None));
            }
            StreamDelta::ReasoningDelta(text) => {
                self.flush_open_call(&mut out);
                out.push(self.chunk(vec![json!({ "text": text, "thought": true })], None));
            }
            StreamDelta::ToolCallStart { name, .. } => {
                self.flush_open_call(&mut out);
                self.saw_tool_call = true;
                self.open_call = Some((name.clone(), String::new()));
            }
            StreamDelta::ToolCallDelta { arguments, .. } => {
                if let Some((_, buffer)) = &mut self.open_call {
                    buffer.push_str(arguments);
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

impl GeminiStreamEncoder {
    fn terminal_frames(&mut self) -> Vec<Bytes> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut out = Vec::new();
        self.flush_open_call(&mut out);
        let reason = if self.finish_reason == FinishReason::Stop && self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            self.finish_reason
        };
        let mut body = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [] },
                "finishReason": render_finish_reason(reason),
                "index": 0,
            }],
            "usageMetadata": {
                "promptTokenCount": self.usage.input_tokens,
                "candidatesTokenCount": self.usage.output_tokens,
                "totalTokenCount": self.usage.input_tokens + self.usage.output_tokens,
            },
        });
        if let Some(object) = body.as_object_mut() {
            if !self.model.is_empty() {
                object.insert("modelVersion".into(), json!(self.model));
            }
        }
        out.push(SseFrame::data_only(body.to_string()).encode());
        out
    }
}
