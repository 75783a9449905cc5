//! OpenAI chat completions stream codec.

use bytes::Bytes;
use serde_json::json;

use plexus_protocol::openai::chat::{ChatCompletionChunk, ChatUsage};
use plexus_protocol::sse::{SseFrame, done_frame};

use super::{StreamDecoder, StreamDelta, StreamEncoder};
use crate::dialect::openai_chat::{parse_finish_reason, render_finish_reason};
use crate::unified::{FinishReason, TokenUsage};

#[derive(Default)]
pub struct ChatStreamDecoder {
    started: bool,
    /// Wire tool-call index → (unified index, has_started).
    open_calls: Vec<u32>,
}

impl ChatStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for ChatStreamDecoder {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        if frame.is_done_marker() {
            return vec![StreamDelta::Done];
        }
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&frame.data) else {
            return Vec::new();
        };

        let mut deltas = Vec::new();
        if !self.started {
            self.started = true;
            deltas.push(StreamDelta::Start {
                id: chunk.id.clone(),
                model: chunk.model.clone(),
            });
        }
        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.reasoning_content {
                if !text.is_empty() {
                    deltas.push(StreamDelta::ReasoningDelta(text.clone()));
                }
            }
            if let Some(text) = &choice.delta.content {
                if !text.is_empty() {
                    deltas.push(StreamDelta::TextDelta(text.clone()));
                }
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    if !self.open_calls.contains(&call.index) {
                        self.open_calls.push(call.index);
                        deltas.push(StreamDelta::ToolCallStart {
                            index: call.index,
                            id: call.id.clone().unwrap_or_default(),
                            name: call
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default(),
                        });
                    }
                    if let Some(arguments) =
                        call.function.as_ref().and_then(|f| f.arguments.clone())
                    {
                        if !arguments.is_empty() {
                            deltas.push(StreamDelta::ToolCallDelta {
                                index: call.index,
                                arguments,
                            });
                        }
                    }
                }
            }
            if let Some(reason) = &choice.finish_reason {
                deltas.push(StreamDelta::Finish(parse_finish_reason(Some(reason))));
            }
        }
        if let Some(usage) = &chunk.usage {
            deltas.push(StreamDelta::Usage(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cached_tokens: usage
                    .prompt_tokens_details
                    .as_ref()
                    .and_then(|d| d.cached_tokens),
                reasoning_tokens: usage
                    .completion_tokens_details
                    .as_ref()
                    .and_then(|d| d.reasoning_tokens),
            }));
        }
        deltas
    }
}

pub struct ChatStreamEncoder {
    include_usage: bool,
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    sent_finish: bool,
    sent_done: bool,
    usage: Option<TokenUsage>,
    finish_reason: FinishReason,
    saw_tool_call: bool,
}

impl ChatStreamEncoder {
    pub fn new(include_usage: bool) -> Self {
        Self {
            include_usage,
            id: String::new(),
            model: String::new(),
            created: time::OffsetDateTime::now_utc().unix_timestamp(),
            sent_role: false,
            sent_finish: false,
            sent_done: false,
            usage: None,
            finish_reason: FinishReason::Stop,
            saw_tool_call: false,
        }
    }

    fn chunk(&self, delta: serde_json::Value, finish_reason: Option<&str>) -> Bytes {
        let body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        SseFrame::data_only(body.to_string()).encode()
    }

    fn role_preamble(&mut self, out: &mut Vec<Bytes>) {
        if !self.sent_role {
            self.sent_role = true;
            out.push(self.chunk(json!({ "role": "assistant" }), None));
        }
    }

    fn finish_chunk(&mut self) -> Vec<Bytes> {
        if self.sent_finish {
            return Vec::new();
        }
        self.sent_finish = true;
        let reason = if self.finish_reason == FinishReason::Stop && self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            self.finish_reason
        };
        vec![self.chunk(json!({}), Some(render_finish_reason(reason)))]
    }
}

impl StreamEncoder for ChatStreamEncoder {
    fn encode(&mut self, delta: &StreamDelta) -> Vec<Bytes> {
        let mut out = Vec::new();
        match delta {
            StreamDelta::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
                self.role_preamble(&mut out);
            }
            StreamDelta::TextDelta(text) => {
                self.role_preamble(&mut out);
                out.push(self.chunk(json!({ "content": text }), None));
            }
            StreamDelta::ReasoningDelta(text) => {
                self.role_preamble(&mut out);
                out.push(self.chunk(json!({ "reasoning_content": text }), None));
            }
            StreamDelta::ToolCallStart { index, id, name } => {
                self.role_preamble(&mut out);
                self.saw_tool_call = true;
                out.push(self.chunk(
                    json!({
                        "tool_calls": [{
                            "index": index,
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": "" },
                        }]
                    }),
                    None,
                ));
            }
            StreamDelta::ToolCallDelta { index, arguments } => {
                out.push(self.chunk(
                    json!({
                        "tool_calls": [{
                            "index": index,
                            "function": { "arguments": arguments },
                        }]
                    }),
                    None,
                ));
            }
            StreamDelta::Finish(reason) => {
                self.finish_reason = *reason;
                out.extend(self.finish_chunk());
            }
            StreamDelta::Usage(usage) => {
                self.usage = Some(*usage);
            }
            StreamDelta::Done => {
                out.extend(self.finish_frames());
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        self.finish_frames()
    }
}

impl ChatStreamEncoder {
    fn finish_frames(&mut self) -> Vec<Bytes> {
        if self.sent_done {
            return Vec::new();
        }
        let mut out = self.finish_chunk();
        if self.include_usage {
            let usage = self.usage.unwrap_or_default();
            let wire = ChatUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
                prompt_tokens_details: None,
                completion_tokens_details: None,
            };
            let body = json!({
                "id": self.id,
                "object": "chat.completion.chunk",
                "created": self.created,
                "model": self.model,
                "choices": [],
                "usage": wire,
            });
            out.push(SseFrame::data_only(body.to_string()).encode());
        }
        self.sent_done = true;
        out.push(done_frame());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_protocol::sse::SseDecoder;

    fn frames_of(bytes: &[Bytes]) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes {
            frames.extend(decoder.push(chunk));
        }
        frames
    }

    #[test]
    fn decoder_emits_start_text_finish() {
        let mut decoder = ChatStreamDecoder::new();
        let first = SseFrame::data_only(
            r#"{"id":"c1","object":"chat.completion.chunk","created":0,"model":"m",
               "choices":[{"index":0,"delta":{"role":"assistant","content":"he"}}]}"#
                .replace('\n', ""),
        );
        let deltas = decoder.on_frame(&first);
        assert_eq!(
            deltas[0],
            StreamDelta::Start {
                id: "c1".into(),
                model: "m".into()
            }
        );
        assert_eq!(deltas[1], StreamDelta::TextDelta("he".into()));

        let last = SseFrame::data_only(
            r#"{"id":"c1","object":"chat.completion.chunk","created":0,"model":"m",
               "choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#
                .replace('\n', ""),
        );
        let deltas = decoder.on_frame(&last);
        assert_eq!(deltas[0], StreamDelta::Finish(FinishReason::Stop));
        assert_eq!(
            decoder.on_frame(&SseFrame::data_only("[DONE]")),
            vec![StreamDelta::Done]
        );
    }

    #[test]
    fn encoder_terminates_after_abrupt_close() {
        let mut encoder = ChatStreamEncoder::new(false);
        let mut bytes = encoder.encode(&StreamDelta::Start {
            id: "x".into(),
            model: "m".into(),
        });
        bytes.extend(encoder.encode(&StreamDelta::TextDelta("hi".into())));
        // No Done from upstream; finish() must still close the stream.
        bytes.extend(encoder.finish());
        let frames = frames_of(&bytes);
        assert!(frames.last().unwrap().is_done_marker());
        let finish_frame = &frames[frames.len() - 2];
        assert!(finish_frame.data.contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn usage_chunk_emitted_when_requested() {
        let mut encoder = ChatStreamEncoder::new(true);
        encoder.encode(&StreamDelta::Start {
            id: "x".into(),
            model: "m".into(),
        });
        encoder.encode(&StreamDelta::Usage(TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
            cached_tokens: None,
            reasoning_tokens: None,
        }));
        let bytes = encoder.encode(&StreamDelta::Done);
        let frames = frames_of(&bytes);
        let usage_frame = frames
            .iter()
            .find(|f| f.data.contains("\"usage\""))
            .expect("usage frame present");
        assert!(usage_frame.data.contains("\"total_tokens\":10"));
        assert!(frames.last().unwrap().is_done_marker());
        // finish() after Done is a no-op.
        assert!(encoder.finish().is_empty());
    }
}
