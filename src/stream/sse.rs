//! Server-Sent Events framing
//!
//! Encoding is used by test servers and tools; decoding turns the chunked
//! `text/event-stream` body into discrete events.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Event name used when the server does not send an `event:` line
pub const DEFAULT_EVENT: &str = "message";

/// Longest line the decoder buffers before dropping it
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// A single SSE event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    /// Event type (e.g., "message", "frame", "heartbeat")
    pub event: String,
    /// Event data, multi-line data joined with `\n`
    pub data: String,
    /// Event ID (optional)
    pub id: Option<String>,
    /// Reconnection delay hint in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Create a new event
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    /// Create a frame event
    pub fn frame(data: impl Into<String>) -> Self {
        Self::new("frame", data)
    }

    /// Create a heartbeat event
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", "")
    }

    /// Set event ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether this event carries a frame payload
    pub fn is_frame(&self) -> bool {
        self.event == "frame" || self.event == DEFAULT_EVENT
    }

    /// Format as SSE
    pub fn to_sse(&self) -> String {
        let mut result = String::new();

        if let Some(id) = &self.id {
            result.push_str(&format!("id: {}\n", id));
        }
        if let Some(retry) = self.retry {
            result.push_str(&format!("retry: {}\n", retry));
        }

        result.push_str(&format!("event: {}\n", self.event));

        // Handle multi-line data
        for line in self.data.lines() {
            result.push_str(&format!("data: {}\n", line));
        }
        if self.data.is_empty() {
            result.push_str("data: \n");
        }

        result.push('\n');
        result
    }
}

/// Incremental `text/event-stream` decoder
///
/// Lines end with `\n`, `\r\n` or a bare `\r`. A line longer than the
/// configured limit is dropped with a warning.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    scanned: usize,
    skip_lf: bool,
    discarding: bool,
    max_line: usize,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
    started: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            skip_lf: false,
            discarding: false,
            max_line: DEFAULT_MAX_LINE_BYTES,
            event: None,
            data: Vec::new(),
            id: None,
            retry: None,
            last_event_id: None,
            started: false,
        }
    }
}

impl SseDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the longest accepted line in bytes
    pub fn with_max_line(mut self, bytes: usize) -> Self {
        self.max_line = bytes;
        self
    }

    /// Last `id:` seen, kept across events
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Bytes held for an unterminated line
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk and return every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        if !self.started {
            const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(&BOM) {
                self.buffer.advance(BOM.len());
            }
            self.started = true;
        }

        let mut events = Vec::new();
        loop {
            // `\r\n` split across chunks
            if self.skip_lf {
                match self.buffer.first().copied() {
                    None => break,
                    Some(b'\n') => self.buffer.advance(1),
                    Some(_) => {}
                }
                self.skip_lf = false;
            }

            let found = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r');
            let Some(offset) = found else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_line {
                    if !self.discarding {
                        warn!(limit = self.max_line, "Dropping oversized SSE line");
                    }
                    self.discarding = true;
                    self.buffer.clear();
                    self.scanned = 0;
                }
                break;
            };

            let pos = self.scanned + offset;
            let raw = self.buffer.split_to(pos + 1);
            self.scanned = 0;
            self.skip_lf = raw[pos] == b'\r';

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if pos > self.max_line {
                warn!(limit = self.max_line, len = pos, "Dropping oversized SSE line");
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if id.is_some() {
            self.last_event_id = id.clone();
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\rdata: b\r\r");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: x\r").is_empty());
        let events = decoder.feed(b"\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        assert!(decoder.feed(b"\n").is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_line_dropped() {
        let mut decoder = SseDecoder::new().with_max_line(16);
        assert!(decoder.feed(b"data: ").is_empty());
        for _ in 0..50 {
            assert!(decoder.feed(b"aaaa").is_empty());
            assert!(decoder.buffered() <= 16);
        }

        let events = decoder.feed(b"aaa\n\ndata: ok\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ok");
    }

    #[test]
    fn test_stream_event_sse() {
        let event = SseEvent::frame("{\"t\":1}").with_id("1");

        let sse = event.to_sse();
        assert!(sse.contains("id: 1"));
        assert!(sse.contains("event: frame"));
        assert!(sse.contains("data: {\"t\":1}"));
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn test_encode_decode_multiline() {
        let event = SseEvent::new("message", "line1\nline2\nline3").with_id("7");
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(event.to_sse().as_bytes());

        assert_eq!(events, vec![event]);
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: fr").is_empty());
        assert!(decoder.feed(b"ame\r\ndata: {\"a\"").is_empty());
        let events = decoder.feed(b":1}\r\n\r\ndata: second\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "frame");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, DEFAULT_EVENT);
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn test_comments_and_empty_events_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\n\nevent: heartbeat\n\nretry: 500\ndata:x\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[0].retry, Some(500));
    }

    #[test]
    fn test_bom_and_unterminated_event() {
        let mut decoder = SseDecoder::new();
        let mut chunk = vec![0xEF, 0xBB, 0xBF];
        chunk.extend_from_slice(b"data: one\n\ndata: pending");
        let events = decoder.feed(&chunk);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one");
    }

    #[test]
    fn test_frame_event_names() {
        assert!(SseEvent::frame("{}").is_frame());
        assert!(SseEvent::new(DEFAULT_EVENT, "{}").is_frame());
        assert!(!SseEvent::heartbeat().is_frame());
    }
}
