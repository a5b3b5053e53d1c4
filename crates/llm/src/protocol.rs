//! Incremental decoding of streamed chat responses.
//!
//! Two framings are understood:
//!
//! ```text
//! # WireFormat::DataStream: one `<code>:<json>` frame per line
//! f:{"messageId":"msg-1"}
//! 0:"Hi"
//! 0:" there"
//! d:{"finishReason":"stop"}
//!
//! # WireFormat::UiMessageStream: server-sent events carrying typed JSON
//! data: {"type":"start"}
//!
//! data: {"type":"text-delta","delta":"Hi"}
//!
//! data: [DONE]
//! ```
//!
//! [`FrameDecoder`] accepts raw network chunks in any split and yields
//! [`StreamEvent`]s in arrival order. Frame boundaries are only ever found on
//! `\n`, so a frame (or a multi-byte character) cut across two reads is
//! reassembled before it is parsed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::Role;

/// Framing spoken by the chat endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    #[default]
    DataStream,
    UiMessageStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    /// Bytes that could not be decoded into a frame.
    MalformedFrame,
    /// An error frame sent by the endpoint itself.
    Remote,
}

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ContentDelta(String),
    RoleAnnounce(Role),
    Done,
    Error {
        kind: StreamErrorKind,
        detail: String,
    },
}

impl StreamEvent {
    fn malformed(detail: impl Into<String>) -> Self {
        Self::Error {
            kind: StreamErrorKind::MalformedFrame,
            detail: detail.into(),
        }
    }

    /// Whether no further events may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Single-use decoder for one response stream.
#[derive(Debug)]
pub struct FrameDecoder {
    format: WireFormat,
    pending: Vec<u8>,
    sse: SseFrameBuilder,
    finished: bool,
}

impl FrameDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            pending: Vec::new(),
            sse: SseFrameBuilder::default(),
            finished: false,
        }
    }

    /// True once a `Done` or `Error` event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one raw chunk and returns every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while !self.finished {
            let Some(offset) = pending[consumed..].iter().position(|byte| *byte == b'\n') else {
                break;
            };
            let end = consumed + offset;
            self.decode_line(&pending[consumed..end], &mut events);
            consumed = end + 1;
        }

        if !self.finished {
            pending.drain(..consumed);
            self.pending = pending;
        }

        events
    }

    /// Signals end of input and flushes whatever frame is still buffered.
    ///
    /// A remainder that does not parse yields `Error(MalformedFrame)` and is
    /// discarded. The decoder accepts no input afterwards.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let remainder = std::mem::take(&mut self.pending);
        if !remainder.is_empty() {
            self.decode_line(&remainder, &mut events);
        }

        if !self.finished
            && self.format == WireFormat::UiMessageStream
            && let Some(data) = self.sse.flush()
        {
            self.push(parse_ui_message_payload(&data), &mut events);
        }

        self.finished = true;
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.strip_suffix('\r').unwrap_or(line),
            Err(error) => {
                self.push(Err(format!("frame is not valid UTF-8: {error}")), events);
                return;
            }
        };

        match self.format {
            WireFormat::DataStream => self.push(parse_data_stream_line(line), events),
            WireFormat::UiMessageStream => {
                if let Some(data) = self.sse.process_line(line) {
                    self.push(parse_ui_message_payload(&data), events);
                }
            }
        }
    }

    fn push(
        &mut self,
        parsed: Result<Option<StreamEvent>, String>,
        events: &mut Vec<StreamEvent>,
    ) {
        let event = match parsed {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(detail) => StreamEvent::malformed(detail),
        };

        if event.is_terminal() {
            self.finished = true;
            self.pending.clear();
        }
        events.push(event);
    }
}

fn parse_data_stream_line(line: &str) -> Result<Option<StreamEvent>, String> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let Some((code, payload)) = line.split_once(':') else {
        return Err(format!("frame has no type prefix: {line:?}"));
    };

    let mut code_chars = code.chars();
    let code = match (code_chars.next(), code_chars.next()) {
        (Some(code), None) if code.is_ascii_alphanumeric() => code,
        _ => return Err(format!("invalid frame type {code:?}")),
    };

    let value: Value = serde_json::from_str(payload)
        .map_err(|error| format!("invalid `{code}` frame payload: {error}"))?;

    let event = match code {
        '0' => {
            let Some(text) = value.as_str() else {
                return Err("text frame payload must be a JSON string".to_string());
            };
            if text.is_empty() {
                return Ok(None);
            }
            StreamEvent::ContentDelta(text.to_string())
        }
        'f' => StreamEvent::RoleAnnounce(Role::Assistant),
        'd' => StreamEvent::Done,
        '3' => StreamEvent::Error {
            kind: StreamErrorKind::Remote,
            detail: value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        },
        // Data, annotation, tool and reasoning parts carry nothing for the transcript.
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn parse_ui_message_payload(data: &str) -> Result<Option<StreamEvent>, String> {
    if data.trim() == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }

    let value: Value = serde_json::from_str(data)
        .map_err(|error| format!("invalid event payload: {error}"))?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err("event payload has no `type` field".to_string());
    };

    let event = match kind {
        "start" => StreamEvent::RoleAnnounce(Role::Assistant),
        "text-delta" => {
            let Some(delta) = value.get("delta").and_then(Value::as_str) else {
                return Err("text-delta event has no `delta` string".to_string());
            };
            if delta.is_empty() {
                return Ok(None);
            }
            StreamEvent::ContentDelta(delta.to_string())
        }
        "finish" => StreamEvent::Done,
        "error" => StreamEvent::Error {
            kind: StreamErrorKind::Remote,
            detail: value
                .get("errorText")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        _ => return Ok(None),
    };

    Ok(Some(event))
}

/// Collects `data:` lines until the blank line that closes an SSE event.
#[derive(Debug, Default)]
struct SseFrameBuilder {
    data_lines: Vec<String>,
}

impl SseFrameBuilder {
    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        // `event`, `id` and `retry` do not change how the payload is read.
        if field == "data" {
            self.data_lines.push(value.to_string());
        }

        None
    }

    fn flush(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }

        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA_STREAM: &str = "f:{\"messageId\":\"msg-1\"}\n0:\"Hi\"\n0:\" th\u{00e9}re \u{1f44b}\"\n8:[{\"note\":1}]\ne:{\"finishReason\":\"stop\"}\nd:{\"finishReason\":\"stop\"}\n";

    const UI_STREAM: &str = ": keep-alive\n\ndata: {\"type\":\"start\",\"messageId\":\"msg-1\"}\n\ndata: {\"type\":\"text-delta\",\"id\":\"t\",\"delta\":\"Hi\"}\r\n\r\nevent: message\ndata: {\"type\":\"text-delta\",\"id\":\"t\",\"delta\":\" th\u{00e9}re \u{1f44b}\"}\n\ndata: {\"type\":\"reasoning-delta\",\"delta\":\"hmm\"}\n\ndata: {\"type\":\"finish\"}\n\ndata: [DONE]\n\n";

    fn expected_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::RoleAnnounce(Role::Assistant),
            StreamEvent::ContentDelta("Hi".to_string()),
            StreamEvent::ContentDelta(" th\u{00e9}re \u{1f44b}".to_string()),
            StreamEvent::Done,
        ]
    }

    fn decode_all(format: WireFormat, chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = FrameDecoder::new(format);
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn data_stream_decodes_frames_in_order() {
        let events = decode_all(WireFormat::DataStream, &[DATA_STREAM.as_bytes()]);
        assert_eq!(events, expected_events());
    }

    #[test]
    fn ui_message_stream_decodes_frames_in_order() {
        let events = decode_all(WireFormat::UiMessageStream, &[UI_STREAM.as_bytes()]);
        assert_eq!(events, expected_events());
    }

    #[test]
    fn any_two_way_split_yields_identical_events() {
        for (format, input) in [
            (WireFormat::DataStream, DATA_STREAM),
            (WireFormat::UiMessageStream, UI_STREAM),
        ] {
            let bytes = input.as_bytes();
            let whole = decode_all(format, &[bytes]);

            for offset in 0..=bytes.len() {
                let (head, tail) = bytes.split_at(offset);
                let split = decode_all(format, &[head, tail]);
                assert_eq!(split, whole, "{format:?} split at byte {offset}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_input() {
        let bytes = DATA_STREAM.as_bytes();
        let chunks = bytes.chunks(1).collect::<Vec<_>>();
        assert_eq!(decode_all(WireFormat::DataStream, &chunks), expected_events());
    }

    #[test]
    fn partial_frame_waits_for_newline() {
        let mut decoder = FrameDecoder::new(WireFormat::DataStream);
        assert!(decoder.feed(b"0:\"Hel").is_empty());
        assert_eq!(
            decoder.feed(b"lo\"\n0:\"!\"\n"),
            vec![
                StreamEvent::ContentDelta("Hello".to_string()),
                StreamEvent::ContentDelta("!".to_string()),
            ]
        );
    }

    #[test]
    fn truncated_final_frame_is_malformed() {
        let mut decoder = FrameDecoder::new(WireFormat::DataStream);
        assert_eq!(
            decoder.feed(b"0:\"Hi\"\n0:\"trunc"),
            vec![StreamEvent::ContentDelta("Hi".to_string())]
        );

        let flushed = decoder.finish();
        assert!(matches!(
            flushed.as_slice(),
            [StreamEvent::Error {
                kind: StreamErrorKind::MalformedFrame,
                ..
            }]
        ));
        assert!(decoder.feed(b"0:\"late\"\n").is_empty());
    }

    #[test]
    fn complete_final_frame_without_newline_is_accepted() {
        let events = decode_all(WireFormat::DataStream, &[b"0:\"Hi\"\nd:{}"]);
        assert_eq!(
            events,
            vec![StreamEvent::ContentDelta("Hi".to_string()), StreamEvent::Done]
        );
    }

    #[test]
    fn malformed_line_stops_decoding() {
        let mut decoder = FrameDecoder::new(WireFormat::DataStream);
        let events = decoder.feed(b"0:\"ok\"\nnot a frame\n0:\"ignored\"\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::ContentDelta("ok".to_string()));
        assert!(matches!(
            events[1],
            StreamEvent::Error {
                kind: StreamErrorKind::MalformedFrame,
                ..
            }
        ));
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn text_frame_with_non_string_payload_is_malformed() {
        let events = decode_all(WireFormat::DataStream, &[b"0:{\"text\":1}\n"]);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error {
                kind: StreamErrorKind::MalformedFrame,
                ..
            }]
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let events = decode_all(WireFormat::DataStream, &[b"0:\"\xff\"\n"]);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error {
                kind: StreamErrorKind::MalformedFrame,
                ..
            }]
        ));
    }

    #[test]
    fn remote_error_frame_is_terminal() {
        let events = decode_all(
            WireFormat::DataStream,
            &[b"0:\"partial\"\n3:\"model overloaded\"\n0:\"after\"\n"],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta("partial".to_string()),
                StreamEvent::Error {
                    kind: StreamErrorKind::Remote,
                    detail: "model overloaded".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_text_frames_and_blank_lines_are_skipped() {
        let events = decode_all(WireFormat::DataStream, &[b"\n0:\"\"\n\r\nd:{}\n"]);
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn events_after_done_are_ignored() {
        let mut decoder = FrameDecoder::new(WireFormat::DataStream);
        let events = decoder.feed(b"d:{}\n0:\"late\"\n");
        assert_eq!(events, vec![StreamEvent::Done]);
        assert!(decoder.feed(b"0:\"later\"\n").is_empty());
    }

    #[test]
    fn ui_message_stream_error_event_is_remote() {
        let events = decode_all(
            WireFormat::UiMessageStream,
            &[b"data: {\"type\":\"error\",\"errorText\":\"rate limited\"}\n\n"],
        );
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                kind: StreamErrorKind::Remote,
                detail: "rate limited".to_string(),
            }]
        );
    }

    #[test]
    fn ui_message_stream_flushes_unterminated_event() {
        let events = decode_all(
            WireFormat::UiMessageStream,
            &[b"data: {\"type\":\"text-delta\",\"delta\":\"tail\"}"],
        );
        assert_eq!(events, vec![StreamEvent::ContentDelta("tail".to_string())]);
    }

    #[test]
    fn ui_message_stream_rejects_untyped_payload() {
        let events = decode_all(WireFormat::UiMessageStream, &[b"data: {\"delta\":\"x\"}\n\n"]);
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error {
                kind: StreamErrorKind::MalformedFrame,
                ..
            }]
        ));
    }

    #[test]
    fn ui_message_stream_joins_multi_line_data() {
        let mut builder = SseFrameBuilder::default();
        assert!(builder.process_line("data: {\"type\":").is_none());
        assert!(builder.process_line("data:\"finish\"}").is_none());
        assert_eq!(
            builder.process_line(""),
            Some("{\"type\":\n\"finish\"}".to_string())
        );
    }
}
