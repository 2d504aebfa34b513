//! Wire envelope framing (§4.1).
//!
//! Two distinct framings are used on the wire:
//!
//! - **Control/API/signaling streams** carry a sequence of independent
//!   JSON values with no length prefix and no delimiter — each value is
//!   simply as many bytes as its own syntax takes. `JsonFrameDecoder`
//!   feeds a `serde_json::StreamDeserializer` incrementally so a frame
//!   that arrives split across several reads is handled correctly.
//! - **In-band terminal streams** (regular interactive SSH sessions)
//!   carry ordinary terminal bytes with the occasional OSC escape
//!   sequence spliced in: `ESC ']' <tag> ';' <json> (BEL | ESC '\')`.
//!   `OscScanner` is a byte-at-a-time FSM that passes everything that
//!   isn't part of a recognized envelope straight through untouched,
//!   per the requirement that UNN's presence never corrupts the
//!   ordinary terminal stream (§4.1, Testable Property #5, Scenario S6).

use crate::error::EnvelopeError;
use serde_json::Value;

/// Incrementally decodes a byte stream into independent JSON values
/// with no delimiter between them, per §4.1.
///
/// `serde_json::StreamDeserializer` already knows how to find the end
/// of one JSON value in a buffer that might contain a second, partial
/// one; this wraps it so callers can `feed()` bytes as they arrive off
/// a socket and drain whatever complete frames are now available.
#[derive(Default)]
pub struct JsonFrameDecoder {
    buf: Vec<u8>,
}

impl JsonFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly-read bytes and return every complete JSON value now
    /// decodable from the buffer, leaving any trailing partial value in
    /// place for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Value>, EnvelopeError> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;
        {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => {
                        consumed = stream.byte_offset();
                        frames.push(value);
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => return Err(EnvelopeError::MalformedFrame(e)),
                    None => break,
                }
            }
        }
        self.buf.drain(..consumed);
        Ok(frames)
    }
}

/// OSC terminator flavor, tracked so an emitted frame matches what was
/// received when echoing (not required by the protocol, but keeps
/// round-trips byte-identical in tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscTerminator {
    Bel,
    StEscBackslash,
}

/// One decoded OSC envelope: `ESC ']' <tag> ';' <json> <terminator>`.
#[derive(Debug, Clone, PartialEq)]
pub struct OscFrame {
    pub tag: u16,
    pub payload: Value,
}

/// Output of feeding bytes through the scanner: plain terminal bytes to
/// pass through untouched, interleaved with any OSC frames recognized
/// along the way, in the order they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    PassThrough(Vec<u8>),
    Frame(OscFrame),
}

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Plain,
    SawEsc,
    InTag,
    InPayload,
    PayloadSawEsc,
}

/// Streaming scanner for OSC escape sequences embedded in an otherwise
/// ordinary terminal byte stream (§4.1). Bytes that are not part of a
/// recognized `ESC ']' ... BEL` / `ESC ']' ... ESC '\'` sequence are
/// emitted verbatim via `ScanEvent::PassThrough`; malformed sequences
/// (non-numeric tag, unparseable JSON) are discarded rather than
/// corrupting the rest of the stream, matching Scenario S6.
#[derive(Default)]
pub struct OscScanner {
    state: State,
    tag_buf: Vec<u8>,
    payload_buf: Vec<u8>,
    passthrough: Vec<u8>,
}

impl Default for State {
    fn default() -> Self {
        State::Plain
    }
}

impl OscScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return the events recognized so far.
    /// Safe to call repeatedly with arbitrarily small chunks, including
    /// chunks that split an escape sequence mid-way.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            self.feed_byte(b, &mut events);
        }
        self.flush_passthrough(&mut events);
        events
    }

    fn flush_passthrough(&mut self, events: &mut Vec<ScanEvent>) {
        if !self.passthrough.is_empty() {
            events.push(ScanEvent::PassThrough(std::mem::take(&mut self.passthrough)));
        }
    }

    fn feed_byte(&mut self, b: u8, events: &mut Vec<ScanEvent>) {
        match self.state {
            State::Plain => {
                if b == ESC {
                    self.state = State::SawEsc;
                } else {
                    self.passthrough.push(b);
                }
            }
            State::SawEsc => {
                if b == b']' {
                    self.flush_passthrough(events);
                    self.tag_buf.clear();
                    self.state = State::InTag;
                } else {
                    // Not an OSC sequence we recognize; replay both bytes
                    // as plain terminal output.
                    self.passthrough.push(ESC);
                    self.passthrough.push(b);
                    self.state = State::Plain;
                }
            }
            State::InTag => {
                if b == b';' {
                    self.payload_buf.clear();
                    self.state = State::InPayload;
                } else if b.is_ascii_digit() {
                    self.tag_buf.push(b);
                } else {
                    // Malformed tag: abandon the sequence, drop what we
                    // buffered, resume plain scanning from here.
                    self.state = State::Plain;
                }
            }
            State::InPayload => {
                if b == BEL {
                    self.emit_frame(events, OscTerminator::Bel);
                } else if b == ESC {
                    self.state = State::PayloadSawEsc;
                } else {
                    self.payload_buf.push(b);
                }
            }
            State::PayloadSawEsc => {
                if b == b'\\' {
                    self.emit_frame(events, OscTerminator::StEscBackslash);
                } else {
                    // Esc inside payload wasn't a string terminator;
                    // treat literally and keep collecting.
                    self.payload_buf.push(ESC);
                    self.payload_buf.push(b);
                    self.state = State::InPayload;
                }
            }
        }
    }

    fn emit_frame(&mut self, events: &mut Vec<ScanEvent>, _terminator: OscTerminator) {
        let tag: Option<u16> = std::str::from_utf8(&self.tag_buf)
            .ok()
            .and_then(|s| s.parse().ok());
        let payload: Option<Value> = serde_json::from_slice(&self.payload_buf).ok();
        if let (Some(tag), Some(payload)) = (tag, payload) {
            events.push(ScanEvent::Frame(OscFrame { tag, payload }));
        }
        self.tag_buf.clear();
        self.payload_buf.clear();
        self.state = State::Plain;
    }
}

/// Encode an OSC frame for writing to an in-band terminal stream,
/// terminated with BEL (the more widely-supported terminator; §4.1
/// says either is acceptable on receive).
pub fn encode_osc_frame(tag: u16, payload: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(ESC);
    out.push(b']');
    out.extend_from_slice(tag.to_string().as_bytes());
    out.push(b';');
    out.extend_from_slice(payload.to_string().as_bytes());
    out.push(BEL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_frame_decoder_handles_split_frame() {
        let mut dec = JsonFrameDecoder::new();
        let full = br#"{"type":"room_list","payload":[]}"#;
        let (a, b) = full.split_at(10);
        assert!(dec.feed(a).unwrap().is_empty());
        let frames = dec.feed(b).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "room_list");
    }

    #[test]
    fn json_frame_decoder_handles_back_to_back_frames() {
        let mut dec = JsonFrameDecoder::new();
        let frames = dec.feed(br#"{"a":1}{"b":2}"#).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["a"], 1);
        assert_eq!(frames[1]["b"], 2);
    }

    #[test]
    fn osc_scanner_extracts_frame_from_plain_text() {
        let mut scanner = OscScanner::new();
        let mut bytes = b"hello ".to_vec();
        bytes.extend(encode_osc_frame(31337, &json!({"action": "popup"})));
        bytes.extend_from_slice(b" world");
        let events = scanner.feed(&bytes);
        assert_eq!(
            events,
            vec![
                ScanEvent::PassThrough(b"hello ".to_vec()),
                ScanEvent::Frame(OscFrame {
                    tag: 31337,
                    payload: json!({"action": "popup"})
                }),
                ScanEvent::PassThrough(b" world".to_vec()),
            ]
        );
    }

    #[test]
    fn osc_scanner_handles_frame_split_across_feeds() {
        let mut scanner = OscScanner::new();
        let frame = encode_osc_frame(9, &json!({"action": "download"}));
        let (a, b) = frame.split_at(frame.len() / 2);
        let mut events = scanner.feed(a);
        events.extend(scanner.feed(b));
        let frames: Vec<_> = events
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::Frame(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].tag, 9);
    }

    #[test]
    fn osc_scanner_drops_malformed_tag_without_corrupting_stream() {
        let mut scanner = OscScanner::new();
        // ESC ']' followed by a non-digit tag char, then ordinary text.
        let mut bytes = vec![ESC, b']', b'x'];
        bytes.extend_from_slice(b"after");
        let events = scanner.feed(&bytes);
        // The malformed sequence is dropped; "after" (the 'x' was consumed
        // as part of abandoning the tag) still passes through.
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::PassThrough(b) if b == b"after")));
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Frame(_))));
    }

    #[test]
    fn osc_scanner_st_terminator_also_recognized() {
        let mut scanner = OscScanner::new();
        let mut bytes = vec![ESC, b']'];
        bytes.extend_from_slice(b"31337;{}");
        bytes.push(ESC);
        bytes.push(b'\\');
        let events = scanner.feed(&bytes);
        assert_eq!(
            events,
            vec![ScanEvent::Frame(OscFrame {
                tag: 31337,
                payload: json!({})
            })]
        );
    }

    #[test]
    fn lone_esc_not_followed_by_bracket_passes_through() {
        let mut scanner = OscScanner::new();
        let events = scanner.feed(&[ESC, b'X']);
        assert_eq!(events, vec![ScanEvent::PassThrough(vec![ESC, b'X'])]);
    }
}
