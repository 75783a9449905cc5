//! Streaming translation.
//!
//! A provider byte stream is SSE-decoded, turned into [`StreamDelta`]
//! events by the provider dialect's decoder, re-encoded by the client
//! dialect's encoder, and simultaneously folded into a
//! [`ResponseAccumulator`] so usage accounting survives streaming. Frames
//! are emitted incrementally; nothing waits for message completion.

pub mod anthropic;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;

use bytes::{Bytes, BytesMut};

use plexus_common::ApiType;
use plexus_protocol::sse::{SseDecoder, SseFrame};

use crate::unified::{
    CompletedResponse, ContentPart, FinishReason, TokenUsage, TransformError, parse_tool_arguments,
};

/// Dialect-neutral stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// First frame: upstream message id and concrete model.
    Start { id: String, model: String },
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStart { index: u32, id: String, name: String },
    /// Partial JSON-encoded arguments for an open tool call.
    ToolCallDelta { index: u32, arguments: String },
    Finish(FinishReason),
    Usage(TokenUsage),
    /// Upstream signalled a clean end of stream.
    Done,
}

/// Provider dialect → unified deltas, one SSE frame at a time.
pub trait StreamDecoder: Send {
    fn on_frame(&mut self, frame: &SseFrame) -> Vec<StreamDelta>;
    /// Upstream closed; flush anything pending.
    fn on_end(&mut self) -> Vec<StreamDelta> {
        Vec::new()
    }
}

/// Unified deltas → client dialect frames.
pub trait StreamEncoder: Send {
    fn encode(&mut self, delta: &StreamDelta) -> Vec<Bytes>;
    /// Emit whatever terminal frames the dialect still owes (e.g. a
    /// `[DONE]` marker or `message_stop`), even after an abrupt upstream
    /// close.
    fn finish(&mut self) -> Vec<Bytes>;
}

pub fn decoder_for(api_type: ApiType) -> Result<Box<dyn StreamDecoder>, TransformError> {
    match api_type {
        ApiType::Chat => Ok(Box::new(openai_chat::ChatStreamDecoder::new())),
        ApiType::Messages => Ok(Box::new(anthropic::MessagesStreamDecoder::new())),
        ApiType::Gemini => Ok(Box::new(gemini::GeminiStreamDecoder::new())),
        ApiType::Responses => Ok(Box::new(openai_responses::ResponsesStreamDecoder::new())),
        other => Err(TransformError::Unsupported(other)),
    }
}

pub fn encoder_for(
    api_type: ApiType,
    include_usage: bool,
) -> Result<Box<dyn StreamEncoder>, TransformError> {
    match api_type {
        ApiType::Chat => Ok(Box::new(openai_chat::ChatStreamEncoder::new(include_usage))),
        ApiType::Messages => Ok(Box::new(anthropic::MessagesStreamEncoder::new())),
        ApiType::Gemini => Ok(Box::new(gemini::GeminiStreamEncoder::new())),
        ApiType::Responses => Ok(Box::new(openai_responses::ResponsesStreamEncoder::new())),
        other => Err(TransformError::Unsupported(other)),
    }
}

/// Rebuilds a [`CompletedResponse`] from the deltas that streamed past.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: String,
    model: String,
    text: String,
    reasoning: String,
    tool_calls: Vec<(u32, String, String, String)>,
    finish_reason: Option<FinishReason>,
    usage: TokenUsage,
    warnings: Vec<String>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::Start { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            StreamDelta::TextDelta(text) => self.text.push_str(text),
            StreamDelta::ReasoningDelta(text) => self.reasoning.push_str(text),
            StreamDelta::ToolCallStart { index, id, name } => {
                self.tool_calls
                    .push((*index, id.clone(), name.clone(), String::new()));
            }
            StreamDelta::ToolCallDelta { index, arguments } => {
                if let Some(call) = self.tool_calls.iter_mut().find(|(i, ..)| i == index) {
                    call.3.push_str(arguments);
                }
            }
            StreamDelta::Finish(reason) => self.finish_reason = Some(*reason),
            StreamDelta::Usage(usage) => self.usage.merge(usage),
            StreamDelta::Done => {}
        }
    }

    pub fn observe_all(&mut self, deltas: &[StreamDelta]) {
        for delta in deltas {
            self.observe(delta);
        }
    }

    pub fn into_response(mut self) -> CompletedResponse {
        let mut parts = Vec::new();
        if !self.reasoning.is_empty() {
            parts.push(ContentPart::Reasoning {
                text: std::mem::take(&mut self.reasoning),
                signature: None,
                encrypted: None,
            });
        }
        if !self.text.is_empty() {
            parts.push(ContentPart::Text {
                text: std::mem::take(&mut self.text),
            });
        }
        let had_tool_calls = !self.tool_calls.is_empty();
        for (_, id, name, arguments) in self.tool_calls.drain(..) {
            let parsed = parse_tool_arguments(&arguments, &mut self.warnings);
            parts.push(ContentPart::ToolCall {
                id,
                name,
                arguments: parsed,
            });
        }
        let finish_reason = self.finish_reason.unwrap_or(if had_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        });
        CompletedResponse {
            id: self.id,
            model: self.model,
            parts,
            finish_reason,
            usage: self.usage,
            warnings: self.warnings,
            plexus: None,
        }
    }
}

/// Bridges one upstream stream to one client stream.
///
/// `push` accepts raw upstream bytes and returns the bytes to forward to
/// the client. In pass-through mode the input bytes are forwarded
/// untouched while still being decoded for accounting.
pub struct StreamTranslator {
    sse: SseDecoder,
    decoder: Box<dyn StreamDecoder>,
    encoder: Option<Box<dyn StreamEncoder>>,
    accumulator: ResponseAccumulator,
}

impl StreamTranslator {
    /// Translating bridge between two dialects.
    pub fn translating(
        provider_api: ApiType,
        client_api: ApiType,
        include_usage: bool,
    ) -> Result<Self, TransformError> {
        Ok(Self {
            sse: SseDecoder::new(),
            decoder: decoder_for(provider_api)?,
            encoder: Some(encoder_for(client_api, include_usage)?),
            accumulator: ResponseAccumulator::new(),
        })
    }

    /// Pass-through bridge: bytes are forwarded verbatim, decoded only for
    /// the usage snapshot.
    pub fn passthrough(provider_api: ApiType) -> Result<Self, TransformError> {
        Ok(Self {
            sse: SseDecoder::new(),
            decoder: decoder_for(provider_api)?,
            encoder: None,
            accumulator: ResponseAccumulator::new(),
        })
    }

    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let frames = self.sse.push(chunk);
        let mut deltas = Vec::new();
        for frame in &frames {
            deltas.extend(self.decoder.on_frame(frame));
        }
        self.accumulator.observe_all(&deltas);

        match &mut self.encoder {
            None => Bytes::copy_from_slice(chunk),
            Some(encoder) => {
                let mut out = BytesMut::new();
                for delta in &deltas {
                    for frame in encoder.encode(delta) {
                        out.extend_from_slice(&frame);
                    }
                }
                out.freeze()
            }
        }
    }

    /// Upstream ended; returns trailing client bytes and the reconstructed
    /// response for usage accounting.
    pub fn finish(mut self) -> (Bytes, CompletedResponse) {
        let mut deltas = Vec::new();
        for frame in self.sse.finish() {
            deltas.extend(self.decoder.on_frame(&frame));
        }
        deltas.extend(self.decoder.on_end());
        self.accumulator.observe_all(&deltas);

        let mut out = BytesMut::new();
        if let Some(encoder) = &mut self.encoder {
            for delta in &deltas {
                for frame in encoder.encode(delta) {
                    out.extend_from_slice(&frame);
                }
            }
            for frame in encoder.finish() {
                out.extend_from_slice(&frame);
            }
        }
        (out.freeze(), self.accumulator.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_reconstructs_tool_call() {
        let mut acc = ResponseAccumulator::new();
        acc.observe_all(&[
            StreamDelta::Start {
                id: "m1".into(),
                model: "x".into(),
            },
            StreamDelta::ToolCallStart {
                index: 0,
                id: "c1".into(),
                name: "add".into(),
            },
            StreamDelta::ToolCallDelta {
                index: 0,
                arguments: "{\"a\":".into(),
            },
            StreamDelta::ToolCallDelta {
                index: 0,
                arguments: "1}".into(),
            },
            StreamDelta::Usage(TokenUsage {
                input_tokens: 5,
                output_tokens: 9,
                cached_tokens: None,
                reasoning_tokens: None,
            }),
            StreamDelta::Done,
        ]);
        let response = acc.into_response();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        let (_, name, args) = response.tool_calls().next().unwrap();
        assert_eq!(name, "add");
        assert_eq!(args["a"], 1);
        assert_eq!(response.usage.output_tokens, 9);
    }

    #[test]
    fn passthrough_forwards_bytes_verbatim() {
        let mut translator = StreamTranslator::passthrough(ApiType::Chat).unwrap();
        let chunk = b"data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let out = translator.push(chunk);
        assert_eq!(&out[..], &chunk[..]);
        let (tail, response) = translator.finish();
        assert!(tail.is_empty());
        assert_eq!(response.text(), "hi");
    }
}
