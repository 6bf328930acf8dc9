//! Decoder for `text/event-stream` response bodies.
//!
//! Network chunks do not line up with SSE lines, so bytes are buffered until a
//! full line is available. Lines end with `\n`, `\r\n` or a bare `\r`. The
//! `data:` lines of one event are joined with `\n` and the event is dispatched
//! at the blank line that ends it. Other fields are ignored.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
    /// The last byte was `\r`, so a following `\n` ends nothing.
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a network chunk and returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            let skip_lf = std::mem::take(&mut self.skip_lf);
            match byte {
                b'\n' if skip_lf => {}
                b'\r' | b'\n' => {
                    self.skip_lf = byte == b'\r';
                    let line = std::mem::take(&mut self.line);
                    if let Some(event) = self.end_line(&line) {
                        events.push(event);
                    }
                }
                _ => self.line.push(byte),
            }
        }
        events
    }

    /// Ends the body: a partial line is kept and a pending event is
    /// dispatched even without its closing blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.skip_lf = false;
        let line = std::mem::take(&mut self.line);
        if !line.is_empty() {
            self.end_line(&line);
        }
        self.dispatch()
    }

    fn end_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        if raw.is_empty() {
            return self.dispatch();
        }

        let line = String::from_utf8_lossy(raw);
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        if data.trim() == "[DONE]" {
            return Some(SseEvent::Done);
        }
        if data.trim().is_empty() {
            return None;
        }
        Some(SseEvent::Data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn buffers_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"con").is_empty());
        assert!(decoder.feed(b"tent\":\"hi\"}").is_empty());
        assert!(decoder.feed(b"\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(events, vec![SseEvent::Data("{\"content\":\"hi\"}".to_string())]);
    }

    #[test]
    fn accepts_every_line_ending() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\r\rdata: two\n\ndata: three\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("one".to_string()),
                SseEvent::Data("two".to_string()),
                SseEvent::Data("three".to_string()),
            ]
        );
    }

    #[test]
    fn crlf_split_between_chunks_is_one_line_ending() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: a\r").is_empty());
        // the \n completes the previous \r, it is not a blank line
        assert!(decoder.feed(b"\n").is_empty());
        assert_eq!(decoder.feed(b"\r\n"), vec![SseEvent::Data("a".to_string())]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"choices\":\ndata: []}\n\n");
        assert_eq!(events, vec![SseEvent::Data("{\"choices\":\n[]}".to_string())]);
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        // 'é' is two bytes; cut between them
        let cut = "data: h".len() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&bytes[..cut]).is_empty());
        let events = decoder.feed(&bytes[cut..]);
        assert_eq!(events, vec![SseEvent::Data("héllo".to_string())]);
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\nevent: message\nid: 7\ndata:\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Done));
        assert_eq!(decoder.finish(), None);

        assert!(decoder.feed(b"data: last\n").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Data("last".to_string())));
    }
}
