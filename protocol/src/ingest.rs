//! Frame decoding for the incrementally-delivered reply stream.
//!
//! Transport fragments arrive with no alignment guarantees: a fragment may
//! end mid-delimiter, mid-frame, or mid-JSON-payload. [`FrameDecoder`] keeps
//! a carry-over buffer so the decoded frame sequence is identical no matter
//! where the transport splits the bytes.

use serde_json::Value;
use thiserror::Error;

use parley_types::{AgentTag, StreamFrame, UNREADABLE_RESPONSE};

/// Hard cap on carry-over buffer growth.
const MAX_FRAME_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// The stream ended with bytes still in the carry-over buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream ended mid-frame")]
pub struct TruncatedStream;

/// Carry-over buffer exceeded [`MAX_FRAME_BUFFER_BYTES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame buffer limit exceeded")]
pub struct FrameOverflow;

fn find_frame_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_frame_boundary(buffer)?;
    let frame = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(frame)
}

/// Extract the payload from one `data:`-prefixed frame.
///
/// Multiple `data:` lines concatenate with newlines; non-data lines
/// (comments, event ids) are ignored.
fn extract_payload(frame: &str) -> Option<String> {
    let mut payload = String::new();
    let mut found = false;

    for line in frame.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                payload.push('\n');
            }
            payload.push_str(rest);
            found = true;
        }
    }

    if found { Some(payload) } else { None }
}

/// Coerce an arbitrary payload value to text.
///
/// Only JSON strings pass through; any other shape degrades to
/// [`UNREADABLE_RESPONSE`]. This runs once at the ingestion boundary so no
/// downstream consumer ever re-checks the shape.
fn normalize_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        other => {
            tracing::warn!(shape = ?other.map(value_kind), "Non-text frame content; substituting placeholder");
            UNREADABLE_RESPONSE.to_owned()
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse one frame payload.
///
/// Returns `Ok(None)` for recognized-but-ignorable frames (unknown `type`
/// tag); `Err` only for unparseable JSON, which the caller skips.
fn parse_frame(payload: &str) -> Result<Option<StreamFrame>, serde_json::Error> {
    let json: Value = serde_json::from_str(payload)?;

    let frame = match json.get("type").and_then(Value::as_str) {
        Some("chunk") => Some(StreamFrame::Chunk {
            content: normalize_content(json.get("content")),
        }),
        Some("final") => Some(StreamFrame::Final {
            content: normalize_content(json.get("content")),
            agent: json
                .get("agent")
                .and_then(Value::as_str)
                .map(AgentTag::new),
        }),
        other => {
            tracing::debug!(frame_type = ?other, "Ignoring unrecognized frame type");
            None
        }
    };

    Ok(frame)
}

/// Incremental decoder from transport fragments to [`StreamFrame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport fragment and emit every frame it completes.
    ///
    /// Frames whose payload is not valid UTF-8 or not valid JSON are skipped
    /// with a warning; decoding always continues.
    pub fn feed(&mut self, fragment: &[u8]) -> Result<Vec<StreamFrame>, FrameOverflow> {
        self.buffer.extend_from_slice(fragment);

        if self.buffer.len() > MAX_FRAME_BUFFER_BYTES {
            return Err(FrameOverflow);
        }

        let mut frames = Vec::new();
        while let Some(raw) = drain_next_frame(&mut self.buffer) {
            if raw.is_empty() {
                continue;
            }

            let Ok(text) = std::str::from_utf8(&raw) else {
                tracing::warn!(frame_bytes = raw.len(), "Skipping non-UTF-8 frame");
                continue;
            };

            let Some(payload) = extract_payload(text) else {
                continue;
            };

            match parse_frame(&payload) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%e, payload_bytes = payload.len(), "Skipping malformed frame payload");
                }
            }
        }

        Ok(frames)
    }

    /// Finish the stream.
    ///
    /// A non-whitespace carry-over means the stream ended mid-frame, which is
    /// a protocol error distinct from a clean end-of-stream.
    pub fn close(self) -> Result<(), TruncatedStream> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(TruncatedStream)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameDecoder, UNREADABLE_RESPONSE, extract_payload, find_frame_boundary};
    use parley_types::{AgentTag, StreamFrame};

    fn chunk(content: &str) -> StreamFrame {
        StreamFrame::Chunk {
            content: content.to_owned(),
        }
    }

    fn decode_all(input: &[u8]) -> Vec<StreamFrame> {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(input).unwrap();
        decoder.close().unwrap();
        frames
    }

    mod boundary {
        use super::find_frame_boundary;

        #[test]
        fn finds_lf_boundary() {
            assert_eq!(find_frame_boundary(b"data: a\n\ndata: b"), Some((7, 2)));
        }

        #[test]
        fn finds_crlf_boundary() {
            assert_eq!(find_frame_boundary(b"data: a\r\n\r\nrest"), Some((7, 4)));
        }

        #[test]
        fn earlier_boundary_wins() {
            assert_eq!(find_frame_boundary(b"a\n\nb\r\n\r\n"), Some((1, 2)));
            assert_eq!(find_frame_boundary(b"a\r\n\r\nb\n\n"), Some((1, 4)));
        }

        #[test]
        fn none_without_boundary() {
            assert_eq!(find_frame_boundary(b"data: incomplete\n"), None);
            assert_eq!(find_frame_boundary(b""), None);
        }
    }

    mod payload {
        use super::extract_payload;

        #[test]
        fn strips_data_prefix_with_and_without_space() {
            assert_eq!(extract_payload("data: hello"), Some("hello".to_owned()));
            assert_eq!(extract_payload("data:hello"), Some("hello".to_owned()));
        }

        #[test]
        fn joins_multiple_data_lines() {
            assert_eq!(
                extract_payload("data: one\ndata: two"),
                Some("one\ntwo".to_owned())
            );
        }

        #[test]
        fn ignores_non_data_lines() {
            assert_eq!(
                extract_payload("event: message\nid: 7\ndata: x\nretry: 1000"),
                Some("x".to_owned())
            );
            assert_eq!(extract_payload("event: ping"), None);
        }

        #[test]
        fn strips_carriage_returns() {
            assert_eq!(
                extract_payload("data: one\r\ndata: two\r"),
                Some("one\ntwo".to_owned())
            );
        }
    }

    #[test]
    fn decodes_chunk_and_final_frames() {
        let frames = decode_all(
            b"data: {\"type\":\"chunk\",\"content\":\"He\"}\n\n\
              data: {\"type\":\"chunk\",\"content\":\"llo!\"}\n\n\
              data: {\"type\":\"final\",\"content\":\"Hello there!\"}\n\n",
        );

        assert_eq!(
            frames,
            vec![
                chunk("He"),
                chunk("llo!"),
                StreamFrame::Final {
                    content: "Hello there!".to_owned(),
                    agent: None,
                },
            ]
        );
    }

    #[test]
    fn final_frame_carries_agent_tag() {
        let frames =
            decode_all(b"data: {\"type\":\"final\",\"content\":\"ok\",\"agent\":\"tutor\"}\n\n");
        let StreamFrame::Final { agent, .. } = &frames[0] else {
            panic!("expected final frame");
        };
        assert_eq!(agent.as_ref().map(AgentTag::as_str), Some("tutor"));
    }

    #[test]
    fn malformed_payload_is_skipped_not_fatal() {
        let frames = decode_all(
            b"data: {not json\n\n\
              data: {\"type\":\"chunk\",\"content\":\"ok\"}\n\n",
        );
        assert_eq!(frames, vec![chunk("ok")]);
    }

    #[test]
    fn unrecognized_type_is_ignored() {
        let frames = decode_all(
            b"data: {\"type\":\"usage\",\"tokens\":12}\n\n\
              data: {\"type\":\"chunk\",\"content\":\"ok\"}\n\n",
        );
        assert_eq!(frames, vec![chunk("ok")]);
    }

    #[test]
    fn non_text_content_degrades_to_placeholder() {
        let frames = decode_all(
            b"data: {\"type\":\"final\",\"content\":{\"parts\":[1,2]}}\n\n\
              data: {\"type\":\"chunk\",\"content\":42}\n\n\
              data: {\"type\":\"chunk\"}\n\n",
        );
        for frame in &frames {
            assert_eq!(frame.content(), UNREADABLE_RESPONSE);
        }
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn close_with_carry_over_reports_truncation() {
        let mut decoder = FrameDecoder::new();
        let _ = decoder.feed(b"data: {\"type\":\"chunk\"").unwrap();
        assert!(decoder.close().is_err());
    }

    #[test]
    fn close_with_trailing_whitespace_is_clean() {
        let mut decoder = FrameDecoder::new();
        let _ = decoder
            .feed(b"data: {\"type\":\"chunk\",\"content\":\"x\"}\n\n\n")
            .unwrap();
        assert!(decoder.close().is_ok());
    }

    /// Splitting the serialized bytes at any position yields the same frame
    /// sequence as feeding everything at once.
    #[test]
    fn chunk_boundary_invariance() {
        let input: &[u8] = b"data: {\"type\":\"chunk\",\"content\":\"He\"}\n\n\
                             data: {\"type\":\"chunk\",\"content\":\"llo!\"}\r\n\r\n\
                             data: {\"type\":\"final\",\"content\":\"Hello there!\"}\n\n";
        let expected = {
            let mut decoder = FrameDecoder::new();
            decoder.feed(input).unwrap()
        };
        assert_eq!(expected.len(), 3);

        for split in 0..=input.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.feed(&input[..split]).unwrap();
            frames.extend(decoder.feed(&input[split..]).unwrap());
            decoder.close().unwrap();
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    /// Same property with multi-byte UTF-8 content split mid-codepoint.
    #[test]
    fn chunk_boundary_invariance_multibyte() {
        let input =
            "data: {\"type\":\"chunk\",\"content\":\"Xin chào\"}\n\ndata: {\"type\":\"final\",\"content\":\"giúp tôi học toán\"}\n\n"
                .as_bytes();
        let expected = {
            let mut decoder = FrameDecoder::new();
            decoder.feed(input).unwrap()
        };

        for split in 0..=input.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.feed(&input[..split]).unwrap();
            frames.extend(decoder.feed(&input[split..]).unwrap());
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    #[test]
    fn feeding_one_byte_at_a_time_matches_whole_buffer() {
        let input: &[u8] = b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n\
                             data: {\"type\":\"final\",\"content\":\"ab\"}\n\n";
        let expected = {
            let mut decoder = FrameDecoder::new();
            decoder.feed(input).unwrap()
        };

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in input {
            frames.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        decoder.close().unwrap();
        assert_eq!(frames, expected);
    }
}
