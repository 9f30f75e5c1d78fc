use bytes::Bytes;

/// Comment frame sent while the upstream is silent.
pub const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// OpenAI-dialect stream terminator.
pub const OPENAI_DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
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

    /// Frames the event for the wire. Multi-line data becomes one `data:`
    /// line per line, per the SSE grammar.
    pub fn encode(&self) -> Bytes {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Incremental SSE decoder. Feed raw chunks as they arrive; complete events
/// come back in arrival order. Partial lines are buffered across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // Invalid UTF-8 chunks are dropped rather than poisoning the buffer;
        // providers only emit UTF-8 SSE.
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }
            self.consume_line(&line, &mut events);
        }
        events
    }

    /// Flush at end of stream: an unterminated final event is still emitted.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.consume_line(&line, &mut events);
        }
        self.flush_pending(&mut events);
        events
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.flush_pending(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.pending_event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "data" => self.pending_data.push(value.to_string()),
            // `id` and `retry` are not meaningful to the gateway.
            _ => {}
        }
    }

    fn flush_pending(&mut self, events: &mut Vec<SseEvent>) {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.pending_event.take(),
            data: std::mem::take(&mut self.pending_data).join("\n"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: hel").is_empty());
        let events = decoder.feed(b"lo\n\ndata: world\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "hello");
        assert_eq!(events[1].data, "world");
    }

    #[test]
    fn named_event_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: message_start\ndata: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![SseEvent::named("message_start", "a\nb")]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\ndata: x\n\n");
        assert_eq!(events, vec![SseEvent::data("x")]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::data("tail")]);
    }

    #[test]
    fn encode_round_trips() {
        let event = SseEvent::named("delta", "line1\nline2");
        let mut decoder = SseDecoder::new();
        let decoded = decoder.feed(&event.encode());
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn crlf_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: x\r\n\r\n");
        assert_eq!(events, vec![SseEvent::data("x")]);
    }
}
