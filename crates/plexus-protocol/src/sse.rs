use bytes::{Bytes, BytesMut};

/// One decoded server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data_only(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// True for the OpenAI-style `data: [DONE]` terminator.
    pub fn is_done_marker(&self) -> bool {
        self.event.is_none() && self.data == "[DONE]"
    }

    /// Serialize back to wire form, blank-line terminated.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        if let Some(event) = &self.event {
            out.extend_from_slice(b"event: ");
            out.extend_from_slice(event.as_bytes());
            out.extend_from_slice(b"\n");
        }
        for line in self.data.split('\n') {
            out.extend_from_slice(b"data: ");
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\n");
        }
        out.extend_from_slice(b"\n");
        out.freeze()
    }
}

/// Encode the OpenAI stream terminator.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Incremental SSE decoder.
///
/// Feed it arbitrary byte chunks; it yields complete frames as they close.
/// Partial lines and split UTF-8 sequences are buffered across calls.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(&line, &mut frames);
        }

        frames
    }

    /// Flush a trailing unterminated frame at end of stream.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(&line, &mut frames);
        }
        self.close_frame(&mut frames);
        frames
    }

    fn push_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.close_frame(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = (!value.is_empty()).then(|| value.to_string());
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            return;
        }
        if line == "event" {
            self.event = None;
        } else if line == "data" {
            self.data_lines.push(String::new());
        }
    }

    fn close_frame(&mut self, frames: &mut Vec<SseFrame>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        frames.push(SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_only_frames() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[1].is_done_marker());
    }

    #[test]
    fn decodes_named_events_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: message_start\nda").is_empty());
        let frames = dec.push(b"ta: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn joins_multi_line_data() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn ignores_comment_lines() {
        let mut dec = SseDecoder::new();
        let frames = dec.push(b": keep-alive\n\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: tail").is_empty());
        let frames = dec.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[test]
    fn encode_round_trips() {
        let frame = SseFrame::named("content_block_delta", "{\"x\":1}");
        let bytes = frame.encode();
        let mut dec = SseDecoder::new();
        let back = dec.push(&bytes);
        assert_eq!(back, vec![frame]);
    }
}
