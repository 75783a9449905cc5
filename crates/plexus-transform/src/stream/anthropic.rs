//! Anthropic messages stream codec.

use bytes::Bytes;
use serde_json::json;

use plexus_protocol::claude::messages::{ContentDelta, MessagesStreamEvent};
use plexus_protocol::sse::SseFrame;

use super::{StreamDecoder, StreamDelta, StreamEncoder};
use crate::dialect::anthropic::{parse_stop_reason, render_stop_reason};
use crate::unified::{FinishReason, TokenUsage};

#[derive(Default)]
pub struct MessagesStreamDecoder {
    /// Wire block index → unified tool-call index, for open tool blocks.
    tool_blocks: Vec<(u32, u32)>,
    next_tool_index: u32,
    input_tokens: u64,
    cached_tokens: Option<u64>,
}

impl MessagesStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for MessagesStreamDecoder {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta> {
        let Ok(event) = serde_json::from_str::<MessagesStreamEvent>(&frame.data) else {
            return Vec::new();
        };
        match event {
            MessagesStreamEvent::MessageStart { message } => {
                // Input tokens arrive up front; output arrives in
                // message_delta at the end.
                self.input_tokens = message.usage.input_tokens;
                self.cached_tokens = message.usage.cache_read_input_tokens;
                vec![StreamDelta::Start {
                    id: message.id,
                    model: message.model,
                }]
            }
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                use plexus_protocol::claude::messages::ContentBlock;
                match content_block {
                    ContentBlock::ToolUse { id, name, .. } => {
                        let unified_index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.tool_blocks.push((index, unified_index));
                        vec![StreamDelta::ToolCallStart {
                            index: unified_index,
                            id,
                            name,
                        }]
                    }
                    ContentBlock::Text { text } if !text.is_empty() => {
                        vec![StreamDelta::TextDelta(text)]
                    }
                    ContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                        vec![StreamDelta::ReasoningDelta(thinking)]
                    }
                    _ => Vec::new(),
                }
            }
            MessagesStreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => vec![StreamDelta::TextDelta(text)],
                ContentDelta::ThinkingDelta { thinking } => {
                    vec![StreamDelta::ReasoningDelta(thinking)]
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    match self.tool_blocks.iter().find(|(wire, _)| *wire == index) {
                        Some((_, unified_index)) => vec![StreamDelta::ToolCallDelta {
                            index: *unified_index,
                            arguments: partial_json,
                        }],
                        None => Vec::new(),
                    }
                }
                ContentDelta::SignatureDelta { .. } => Vec::new(),
            },
            MessagesStreamEvent::ContentBlockStop { .. } => Vec::new(),
            MessagesStreamEvent::MessageDelta { delta, usage } => {
                let mut deltas = Vec::new();
                if let Some(reason) = delta.stop_reason.as_deref() {
                    deltas.push(StreamDelta::Finish(parse_stop_reason(Some(reason))));
                }
                if let Some(usage) = usage {
                    deltas.push(StreamDelta::Usage(TokenUsage {
                        input_tokens: if usage.input_tokens > 0 {
                            usage.input_tokens
                        } else {
                            self.input_tokens
                        },
                        output_tokens: usage.output_tokens,
                        cached_tokens: usage.cache_read_input_tokens.or(self.cached_tokens),
                        reasoning_tokens: None,
                    }));
                }
                deltas
            }
            MessagesStreamEvent::MessageStop => vec![StreamDelta::Done],
            MessagesStreamEvent::Ping => Vec::new(),
            MessagesStreamEvent::Error { .. } => vec![StreamDelta::Finish(FinishReason::Error)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    Tool,
}

pub struct MessagesStreamEncoder {
    started: bool,
    stopped: bool,
    open: OpenBlock,
    next_block_index: u32,
    finish_reason: FinishReason,
    usage: TokenUsage,
    saw_tool_call: bool,
    model: String,
    id: String,
}

impl MessagesStreamEncoder {
    pub fn new() -> Self {
        Self {
            started: false,
            stopped: false,
            open: OpenBlock::None,
            next_block_index: 0,
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            saw_tool_call: false,
            model: String::new(),
            id: String::new(),
        }
    }

    fn frame(event: &MessagesStreamEvent) -> Bytes {
        let data = serde_json::to_string(event).unwrap_or_default();
        SseFrame::named(event.event_name(), data).encode()
    }

    fn start_frame(&mut self) -> Vec<Bytes> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let message = json!({
            "id": self.id,
            "type": "message",
            "role": "assistant",
            "model": self.model,
            "content": [],
            "stop_reason": null,
            "stop_sequence": null,
            "usage": { "input_tokens": self.usage.input_tokens, "output_tokens": 0 },
        });
        let body = json!({ "type": "message_start", "message": message });
        vec![SseFrame::named("message_start", body.to_string()).encode()]
    }

    fn close_block(&mut self, out: &mut Vec<Bytes>) {
        if self.open != OpenBlock::None {
            let index = self.next_block_index - 1;
            out.push(Self::frame(&MessagesStreamEvent::ContentBlockStop { index }));
            self.open = OpenBlock::None;
        }
    }

    fn open_block(&mut self, kind: OpenBlock, start: MessagesStreamEvent, out: &mut Vec<Bytes>) {
        if self.open == kind {
            return;
        }
        self.close_block(out);
        out.push(Self::frame(&start));
        self.open = kind;
        self.next_block_index += 1;
    }

    fn current_index(&self) -> u32 {
        self.next_block_index.saturating_sub(1)
    }
}

impl StreamEncoder for MessagesStreamEncoder {
    fn encode(&mut self, delta: &StreamDelta) -> Vec<Bytes> {
        use plexus_protocol::claude::messages::ContentBlock;

        let mut out = Vec::new();
        match delta {
            StreamDelta::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
                out.extend(self.start_frame());
            }
            StreamDelta::TextDelta(text) => {
                out.extend(self.start_frame());
                let index = if self.open == OpenBlock::Text {
                    self.current_index()
                } else {
                    let index = self.next_block_index;
                    self.open_block(
                        OpenBlock::Text,
                        MessagesStreamEvent::ContentBlockStart {
                            index,
                            content_block: ContentBlock::Text { text: String::new() },
                        },
                        &mut out,
                    );
                    index
                };
                out.push(Self::frame(&MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text: text.clone() },
                }));
            }
            StreamDelta::ReasoningDelta(text) => {
                out.extend(self.start_frame());
                let index = if self.open == OpenBlock::Thinking {
                    self.current_index()
                } else {
                    let index = self.next_block_index;
                    self.open_block(
                        OpenBlock::Thinking,
                        MessagesStreamEvent::ContentBlockStart {
                            index,
                            content_block: ContentBlock::Thinking {
                                thinking: String::new(),
                                signature: None,
                            },
                        },
                        &mut out,
                    );
                    index
                };
                out.push(Self::frame(&MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::ThinkingDelta {
                        thinking: text.clone(),
                    },
                }));
            }
            StreamDelta::ToolCallStart { id, name, .. } => {
                out.extend(self.start_frame());
                self.saw_tool_call = true;
                self.close_block(&mut out);
                let index = self.next_block_index;
                self.open_block(
                    OpenBlock::Tool,
                    MessagesStreamEvent::ContentBlockStart {
                        index,
                        content_block: ContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: json!({}),
                        },
                    },
                    &mut out,
                );
            }
            StreamDelta::ToolCallDelta { arguments, .. } => {
                if self.open == OpenBlock::Tool {
                    out.push(Self::frame(&MessagesStreamEvent::ContentBlockDelta {
                        index: self.current_index(),
                        delta: ContentDelta::InputJsonDelta {
                            partial_json: arguments.clone(),
                        },
                    }));
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

impl MessagesStreamEncoder {
    fn terminal_frames(&mut self) -> Vec<Bytes> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        let mut out = self.start_frame();
        self.close_block(&mut out);
        let reason = if self.finish_reason == FinishReason::Stop && self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            self.finish_reason
        };
        let body = json!({
            "type": "message_delta",
            "delta": { "stop_reason": render_stop_reason(reason), "stop_sequence": null },
            "usage": { "output_tokens": self.usage.output_tokens },
        });
        out.push(SseFrame::named("message_delta", body.to_string()).encode());
        out.push(Self::frame(&MessagesStreamEvent::MessageStop));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_protocol::sse::SseDecoder;

    fn decode(bytes: &[Bytes]) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes {
            frames.extend(decoder.push(chunk));
        }
        frames
    }

    #[test]
    fn decoder_maps_tool_use_blocks() {
        let mut decoder = MessagesStreamDecoder::new();
        let start = SseFrame::named(
            "message_start",
            r#"{"type":"message_start","message":{"id":"m1","type":"message","role":"assistant","model":"c","content":[],"usage":{"input_tokens":12,"output_tokens":0}}}"#,
        );
        let deltas = decoder.on_frame(&start);
        assert_eq!(
            deltas[0],
            StreamDelta::Start {
                id: "m1".into(),
                model: "c".into()
            }
        );

        let block = SseFrame::named(
            "content_block_start",
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"calc","input":{}}}"#,
        );
        let deltas = decoder.on_frame(&block);
        assert_eq!(
            deltas[0],
            StreamDelta::ToolCallStart {
                index: 0,
                id: "t1".into(),
                name: "calc".into()
            }
        );

        let json_delta = SseFrame::named(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"x\""}}"#,
        );
        let deltas = decoder.on_frame(&json_delta);
        assert_eq!(
            deltas[0],
            StreamDelta::ToolCallDelta {
                index: 0,
                arguments: "{\"x\"".into()
            }
        );

        let finale = SseFrame::named(
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#,
        );
        let deltas = decoder.on_frame(&finale);
        assert_eq!(deltas[0], StreamDelta::Finish(FinishReason::ToolCalls));
        match &deltas[1] {
            StreamDelta::Usage(usage) => {
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 7);
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn encoder_produces_block_lifecycle() {
        let mut encoder = MessagesStreamEncoder::new();
        let mut bytes = encoder.encode(&StreamDelta::Start {
            id: "m1".into(),
            model: "c".into(),
        });
        bytes.extend(encoder.encode(&StreamDelta::TextDelta("hel".into())));
        bytes.extend(encoder.encode(&StreamDelta::TextDelta("lo".into())));
        bytes.extend(encoder.encode(&StreamDelta::Finish(FinishReason::Stop)));
        bytes.extend(encoder.encode(&StreamDelta::Done));

        let events: Vec<String> = decode(&bytes)
            .into_iter()
            .filter_map(|f| f.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn abrupt_close_still_emits_message_stop() {
        let mut encoder = MessagesStreamEncoder::new();
        encoder.encode(&StreamDelta::Start {
            id: "m1".into(),
            model: "c".into(),
        });
        encoder.encode(&StreamDelta::TextDelta("partial".into()));
        let bytes = encoder.finish();
        let events: Vec<String> = decode(&bytes).into_iter().filter_map(|f| f.event).collect();
        assert!(events.contains(&"message_stop".to_string()));
        assert!(encoder.finish().is_empty());
    }
}
