//! Incremental Server-Sent-Events decoder.
//!
//! Bytes are fed in arbitrary chunks; only complete frames are emitted.

/**
 * \brief 解析出的 SSE 事件。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /** \brief 以空行结束的完整帧。 */
    Frame {
        event: Option<String>,
        data: String,
        id: Option<String>,
    },
    /** \brief `retry:` 字段给出的重连间隔（毫秒）。 */
    ReconnectInterval(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At a line start with nothing collected for the current frame.
    AwaitingField,
    /// At least one field of the current frame has been read.
    InData,
    /// A blank line closed a frame that carried data.
    FrameComplete,
}

#[derive(Debug)]
pub struct SseDecoder {
    state: State,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending_bytes: Vec<u8>,
    line: String,
    /// Last chunk ended on `\r`; a leading `\n` in the next chunk belongs to it.
    skip_lf: bool,
    event: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            state: State::AwaitingField,
            pending_bytes: Vec::new(),
            line: String::new(),
            skip_lf: false,
            event: None,
            data: String::new(),
            has_data: false,
            id: None,
        }
    }

    /**
     * \brief 喂入一段字节，返回本段内完成的事件。
     */
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = self.decode_utf8(chunk);
        let mut out = Vec::new();
        for ch in text.chars() {
            if self.skip_lf {
                self.skip_lf = false;
                if ch == '\n' {
                    continue;
                }
            }
            match ch {
                '\r' => {
                    self.skip_lf = true;
                    self.end_line(&mut out);
                }
                '\n' => self.end_line(&mut out),
                _ => self.line.push(ch),
            }
        }
        out
    }

    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending_bytes);
        bytes.extend_from_slice(chunk);
        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    text.push_str(s);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end, wait for the next chunk.
                            self.pending_bytes = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    fn end_line(&mut self, out: &mut Vec<SseEvent>) {
        let line = std::mem::take(&mut self.line);
        if line.is_empty() {
            if self.state == State::InData && self.has_data {
                self.state = State::FrameComplete;
            }
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line.as_str(), ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    out.push(SseEvent::ReconnectInterval(ms));
                }
            }
            _ => {}
        }
        self.state = State::InData;
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        if self.state == State::FrameComplete {
            out.push(SseEvent::Frame {
                event: self.event.take(),
                data: std::mem::take(&mut self.data),
                id: self.id.take(),
            });
        }
        self.event = None;
        self.data.clear();
        self.has_data = false;
        self.id = None;
        self.state = State::AwaitingField;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_of(events: &[SseEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Frame { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_chunk_frames() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"data: one\n\nevent: ping\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            SseEvent::Frame {
                event: Some("ping".into()),
                data: "two".into(),
                id: None,
            }
        );
    }

    #[test]
    fn test_byte_by_byte_feeding_matches_whole() {
        let input = "data: {\"a\":1}\n\ndata: 你好\r\n\r\ndata: [DONE]\n\n".as_bytes();
        let mut whole = SseDecoder::new();
        let expected = data_of(&whole.feed(input));

        let mut dec = SseDecoder::new();
        let mut got = Vec::new();
        for b in input {
            got.extend(dec.feed(std::slice::from_ref(b)));
        }
        assert_eq!(data_of(&got), expected);
        assert_eq!(expected, vec!["{\"a\":1}", "你好", "[DONE]"]);
    }

    #[test]
    fn test_invalid_byte_keeps_split_char_pending() {
        let ch = "世".as_bytes();
        let mut first = b"data: \xffa".to_vec();
        first.extend_from_slice(&ch[..2]);
        let mut second = ch[2..].to_vec();
        second.extend_from_slice(b"\n\n");

        let mut dec = SseDecoder::new();
        assert!(dec.feed(&first).is_empty());
        assert_eq!(data_of(&dec.feed(&second)), vec!["\u{FFFD}a世"]);
    }

    #[test]
    fn test_each_invalid_sequence_replaced_once() {
        let mut dec = SseDecoder::new();
        let got = dec.feed(b"data: a\xff\xfeb\n\n");
        assert_eq!(data_of(&got), vec!["a\u{FFFD}\u{FFFD}b"]);
    }

    #[test]
    fn test_incomplete_frame_is_not_emitted() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: partial").is_empty());
        assert!(dec.feed(b"\n").is_empty());
        assert_eq!(data_of(&dec.feed(b"\n")), vec!["partial"]);
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b": keep-alive\ndata: a\ndata: b\nid: 7\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Frame {
                event: None,
                data: "a\nb".into(),
                id: Some("7".into()),
            }]
        );
    }

    #[test]
    fn test_retry_is_reported_separately() {
        let mut dec = SseDecoder::new();
        let events = dec.feed(b"retry: 3000\n\ndata: x\n\n");
        assert_eq!(events[0], SseEvent::ReconnectInterval(3000));
        assert_eq!(data_of(&events), vec!["x"]);
    }

    #[test]
    fn test_frame_without_data_is_dropped() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"event: noop\n\n").is_empty());
        assert_eq!(data_of(&dec.feed(b"data:\n\n")), vec![""]);
    }

    #[test]
    fn test_cr_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: x\r").is_empty());
        assert!(dec.feed(b"\n\r").len() == 1);
        assert!(dec.feed(b"\n").is_empty());
    }
}
