//! Line framing.
//!
//! Links deliver bytes in arbitrary chunks. [`LineReader`] reassembles lines
//! split on CR and LF, and a [`FrameProtocol`] turns each line into a
//! destination and a message:
//!
//! - hex: `0x` + hex(to ++ message)
//! - ASCII: `{"to": <id>, "msg": {a: cinfo, ...}}`
//!
//! Undecodable lines are logged and dropped.

use crate::error::{WireError, WireResult};
use crate::message::Message;
use crate::protocol::ix;
use chrono::{DateTime, Utc};
use ssp_codec::ascii::{parse_value, to_ascii};
use ssp_codec::cast::choose_union_branch;
use ssp_codec::{Format, Ontology, Value};
use ssp_types::config::FrameFormat;
use ssp_types::{ComponentId, Verbosity};
use std::sync::Arc;
use tracing::{trace, warn};

/// Splits a byte stream into lines.
///
/// A CR directly followed by LF (or LF by CR) ends one line. Two identical
/// terminators in a row end an empty line.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
    last_terminator: Option<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the lines it completes.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\r' || b == b'\n' {
                if !self.buf.is_empty() || self.last_terminator == Some(b) {
                    lines.push(String::from_utf8_lossy(&self.buf).into_owned());
                    self.buf.clear();
                }
                self.last_terminator = Some(b);
            } else {
                self.buf.push(b);
                self.last_terminator = None;
            }
        }
        lines
    }

    /// Discards a partial line, e.g. after the connection was lost.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.last_terminator = None;
    }
}

/// A line discipline.
pub trait FrameProtocol: Send + Sync {
    /// The bytes to write for one frame, terminators included.
    fn encode(&self, to: ComponentId, message: &Message) -> WireResult<Vec<u8>>;

    /// Decodes one line. `Ok(None)` for lines that aren't frames at all.
    fn decode_line(&self, line: &str) -> WireResult<Option<(ComponentId, Message)>>;
}

/// SSP-BIN in hexadecimal.
pub struct HexProtocol {
    ont: Arc<Ontology>,
}

impl HexProtocol {
    pub fn new(ont: Arc<Ontology>) -> Self {
        Self { ont }
    }
}

impl FrameProtocol for HexProtocol {
    fn encode(&self, to: ComponentId, message: &Message) -> WireResult<Vec<u8>> {
        let bytes = message.encode(&self.ont, to)?;
        Ok(format!("\n0x{}\n", hex::encode(bytes)).into_bytes())
    }

    fn decode_line(&self, line: &str) -> WireResult<Option<(ComponentId, Message)>> {
        let line: String = line
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\0')
            .collect();
        let Some(digits) = line.strip_prefix("0x") else {
            return Ok(None);
        };
        let bytes = hex::decode(digits).map_err(|e| WireError::Frame(format!("bad hex: {e}")))?;
        Message::decode(&self.ont, &bytes).map(Some)
    }
}

/// SSP-ASCII, one `ToMsg` per line.
pub struct AsciiProtocol {
    ont: Arc<Ontology>,
}

impl AsciiProtocol {
    pub fn new(ont: Arc<Ontology>) -> Self {
        Self { ont }
    }
}

impl FrameProtocol for AsciiProtocol {
    fn encode(&self, to: ComponentId, message: &Message) -> WireResult<Vec<u8>> {
        let frame = Value::Map(vec![
            (Value::from("to"), Value::from(to)),
            (Value::from("msg"), message.to_value()),
        ]);
        Ok(format!("\n{}\n", to_ascii(&self.ont, &frame, Verbosity::Normal)).into_bytes())
    }

    fn decode_line(&self, line: &str) -> WireResult<Option<(ComponentId, Message)>> {
        let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if !line.starts_with('{') {
            return Ok(None);
        }
        let frame = parse_value(&self.ont, line)?;
        let to = frame
            .get("to")
            .and_then(Value::as_u8)
            .ok_or_else(|| WireError::Frame("frame without a valid \"to\"".into()))?;
        let msg = frame
            .get("msg")
            .ok_or_else(|| WireError::Frame("frame without \"msg\"".into()))?;
        let (key, value) = choose_union_branch(&self.ont, msg, &Format::Registered(ix::MSGS))?;
        let code = key
            .as_u8()
            .ok_or_else(|| WireError::Message(format!("bad action key {key:?}")))?;
        Ok(Some((to, Message::from_parts(code, &value)?)))
    }
}

/// The line discipline configured for a link.
pub fn protocol_for(format: FrameFormat, ont: Arc<Ontology>) -> Arc<dyn FrameProtocol> {
    match format {
        FrameFormat::Hex => Arc::new(HexProtocol::new(ont)),
        FrameFormat::Ascii => Arc::new(AsciiProtocol::new(ont)),
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub to: ComponentId,
    pub message: Message,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(to: ComponentId, message: Message) -> Self {
        Self {
            to,
            message,
            received_at: Utc::now(),
        }
    }
}

/// Line reader plus protocol: bytes in, frames out.
pub struct FrameDecoder {
    lines: LineReader,
    protocol: Arc<dyn FrameProtocol>,
}

impl FrameDecoder {
    pub fn new(protocol: Arc<dyn FrameProtocol>) -> Self {
        Self {
            lines: LineReader::new(),
            protocol,
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in self.lines.push(data) {
            match self.protocol.decode_line(&line) {
                Ok(Some((to, message))) => frames.push(Frame::new(to, message)),
                Ok(None) => {
                    if !line.trim().is_empty() {
                        trace!(line = %line, "SSP link: ignoring non-frame line");
                    }
                }
                Err(e) => warn!(error = %e, line = %line, "SSP link: dropping undecodable frame"),
            }
        }
        frames
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ComponentInfo, NewId, ReplyTo};
    use crate::protocol::protocol_ontology;
    use ssp_codec::Symbol;

    fn lines(chunks: &[&str]) -> Vec<String> {
        let mut reader = LineReader::new();
        chunks
            .iter()
            .flat_map(|c| reader.push(c.as_bytes()))
            .collect()
    }

    #[test]
    fn test_line_reader_terminators() {
        assert_eq!(lines(&["hello\r\nabc\r\n"]), vec!["hello", "abc"]);
        assert_eq!(lines(&["hello\n\n"]), vec!["hello", ""]);
        assert_eq!(lines(&["hello\r\r"]), vec!["hello", ""]);
        assert_eq!(lines(&["a\n\rb\n"]), vec!["a", "b"]);
        assert_eq!(lines(&["hello\r\n\r\n"]), vec!["hello"]);
    }

    #[test]
    fn test_line_reader_chunking() {
        assert_eq!(lines(&["h", "ello\r\n"]), lines(&["hello\r\n"]));
        assert_eq!(lines(&["hello\r", "\nabc", "\r\n"]), vec!["hello", "abc"]);
    }

    #[test]
    fn test_line_reader_clear_drops_partial() {
        let mut reader = LineReader::new();
        assert!(reader.push(b"0x01").is_empty());
        reader.clear();
        assert_eq!(reader.push(b"0x02\n"), vec!["0x02"]);
    }

    #[test]
    fn test_hex_frame() {
        let ont = protocol_ontology().unwrap();
        let protocol = HexProtocol::new(ont);
        let msg = Message::Nack {
            from: 1,
            tk: 2,
            code: ssp_types::ErrorCode::Busy,
        };
        let encoded = protocol.encode(3, &msg).unwrap();
        assert_eq!(encoded, b"\n0x0308010203\n".to_vec());

        assert_eq!(protocol.decode_line("  0x0308010203\0").unwrap(), Some((3, msg)));
        assert_eq!(protocol.decode_line("boot banner").unwrap(), None);
        assert!(protocol.decode_line("0x03zz").is_err());
    }

    #[test]
    fn test_ascii_frame() {
        let ont = protocol_ontology().unwrap();
        let protocol = AsciiProtocol::new(ont);
        let msg = Message::Newid(NewId {
            tk: 1,
            id: 7,
            priority: 49,
            name: "gps".into(),
        });
        let encoded = String::from_utf8(protocol.encode(255, &msg).unwrap()).unwrap();
        assert!(encoded.starts_with("\n{\"to\": 255, \"msg\": {a: newid"));
        assert_eq!(
            protocol.decode_line(encoded.trim()).unwrap(),
            Some((255, msg))
        );

        let call = Message::Call {
            reply: Some(ReplyTo { from: 4, tk: 9 }),
            sym: Symbol::new("blink"),
            arg: Value::Int(3),
        };
        let line = "{\"to\": 1, \"msg\": {a: call, from: 4, tk: 9, sym: blink, arg: 3}}";
        assert_eq!(protocol.decode_line(line).unwrap(), Some((1, call)));
    }

    #[test]
    fn test_decoder_drops_bad_lines() {
        let ont = protocol_ontology().unwrap();
        let protocol: Arc<dyn FrameProtocol> = Arc::new(HexProtocol::new(ont));
        let cinfo = Message::Cinfo(ComponentInfo::new(9, 0, 0, "x"));
        let good = protocol.encode(255, &cinfo).unwrap();

        let mut decoder = FrameDecoder::new(protocol);
        let mut frames = decoder.push(b"garbage\n0xff\n");
        frames.extend(decoder.push(&good[..5]));
        frames.extend(decoder.push(&good[5..]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].to, 255);
        assert_eq!(frames[0].message, cinfo);
    }
}
