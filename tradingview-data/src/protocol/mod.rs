//! Wire codec for the TradingView chart socket.
//!
//! Every packet on the socket is framed as `~m~<len>~m~<payload>`, with frames written
//! back-to-back and no separator. A payload is either a heartbeat (`~h~<n>` or a bare
//! integer) or a JSON object `{"m": <type>, "p": [<args>]}`. Lengths count characters
//! of the payload, not bytes. Outbound JSON escapes every non-ASCII character, so for
//! packets we write the character, byte and UTF-16 lengths are all the same.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json, ser::Formatter};
use std::io::{self, Write};
use tracing::{debug, warn};

/// Base64 + zip payloads embedded in study updates.
pub mod compressed;

const FRAME_MARKER: &str = "~m~";
const PING_MARKER: &str = "~h~";

/// Upper bound on undelivered bytes a [`FrameDecoder`] will hold between reads.
pub const MAX_BUFFERED_BYTES: usize = 10 * 1024 * 1024;

/// Structured protocol message, `{"m": kind, "p": data}` on the wire.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Message {
    #[serde(rename = "m")]
    pub kind: String,
    #[serde(rename = "p")]
    pub data: Vec<Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Session id the message is addressed to, always the first data element.
    pub fn session_id(&self) -> Option<&str> {
        self.data.first().and_then(Value::as_str)
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.data.get(index)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(Value::as_str)
    }
}

/// One decoded unit of the wire protocol.
#[derive(Clone, PartialEq, Debug)]
pub enum Frame {
    /// Heartbeat id that must be echoed back to the server.
    Ping(u64),
    Message(Message),
    /// Well formed JSON that is not an `{m, p}` message, eg/ the server hello.
    Other(Value),
}

/// Wrap an already serialised payload as `~m~<len>~m~<payload>`.
pub fn frame(payload: &str) -> String {
    format!("{FRAME_MARKER}{}{FRAME_MARKER}{payload}", payload.chars().count())
}

pub fn encode_message(message: &Message) -> String {
    frame(&to_ascii_json(&json!({ "m": message.kind, "p": message.data })))
}

/// Compact JSON with every non-ASCII character written as a `\uXXXX` escape.
pub fn to_ascii_json(value: &Value) -> String {
    let mut buffer = Vec::new();
    let written = {
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, AsciiFormatter);
        value.serialize(&mut serializer)
    };

    match written.map(|()| String::from_utf8(buffer)) {
        Ok(Ok(json)) => json,
        _ => value.to_string(),
    }
}

struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (index, char) in fragment.char_indices() {
            if char.is_ascii() {
                continue;
            }

            writer.write_all(fragment[start..index].as_bytes())?;
            // Surrogate pairs above U+FFFF
            let mut units = [0u16; 2];
            for unit in char.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = index + char.len_utf8();
        }

        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Encode the heartbeat echo for ping id `id`.
pub fn encode_ping(id: u64) -> String {
    frame(&format!("{PING_MARKER}{id}"))
}

/// Decode every complete frame in `raw`.
///
/// Decoding is best-effort: malformed frames are dropped and a truncated trailing frame
/// is discarded. Use a [`FrameDecoder`] to keep partial frames across reads.
pub fn decode(raw: &str) -> Vec<Frame> {
    split(raw).0
}

/// Stateful decoder that buffers an incomplete trailing frame until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let (frames, consumed) = split(&self.buffer);
        self.buffer.drain(..consumed);

        if self.buffer.len() > MAX_BUFFERED_BYTES {
            warn!(
                buffered = self.buffer.len(),
                "FrameDecoder buffer exceeded limit, discarding partial frame"
            );
            self.buffer.clear();
        }

        frames
    }

    /// Number of bytes held back waiting for the remainder of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Returns the decoded frames and the number of bytes of `raw` that were consumed. Bytes
/// past the consumed offset belong to a frame that is not yet complete.
fn split(raw: &str) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = raw[cursor..].find(FRAME_MARKER) {
        let marker_start = cursor + offset;
        let length_start = marker_start + FRAME_MARKER.len();

        let Some(length_len) = raw[length_start..].find(FRAME_MARKER) else {
            let header = &raw[length_start..];
            if header.bytes().all(|byte| byte.is_ascii_digit() || byte == b'~' || byte == b'm') {
                // Length header split across reads
                return (frames, marker_start);
            }
            return (frames, raw.len());
        };

        let length_end = length_start + length_len;
        let Ok(length) = raw[length_start..length_end].parse::<usize>() else {
            debug!(
                header = &raw[length_start..length_end],
                "dropping frame with malformed length header"
            );
            cursor = length_start;
            continue;
        };

        let payload_start = length_end + FRAME_MARKER.len();
        let Some(payload_len) = char_offset(&raw[payload_start..], length) else {
            return (frames, marker_start);
        };

        let payload_end = payload_start + payload_len;
        if let Some(frame) = parse_payload(&raw[payload_start..payload_end]) {
            frames.push(frame);
        }
        cursor = payload_end;
    }

    // Keep a trailing partial marker (eg/ "~m") for the next read
    let tail = &raw[cursor..];
    if !tail.is_empty() && FRAME_MARKER.starts_with(tail) {
        return (frames, cursor);
    }

    (frames, raw.len())
}

/// Byte offset just past the first `chars` characters of `text`.
fn char_offset(text: &str, chars: usize) -> Option<usize> {
    if chars == 0 {
        return Some(0);
    }
    text.char_indices()
        .nth(chars - 1)
        .map(|(index, char)| index + char.len_utf8())
}

fn parse_payload(payload: &str) -> Option<Frame> {
    let ping = payload.strip_prefix(PING_MARKER).unwrap_or(payload);
    if !ping.is_empty() && ping.bytes().all(|byte| byte.is_ascii_digit()) {
        return ping.parse().ok().map(Frame::Ping);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(frame_from_value(value)),
        Err(error) => {
            debug!(%error, payload, "dropping frame with undecodable payload");
            None
        }
    }
}

fn frame_from_value(value: Value) -> Frame {
    let is_message = value.get("m").is_some_and(Value::is_string)
        && value.get("p").is_some_and(Value::is_array);

    if !is_message {
        return Frame::Other(value);
    }

    match serde_json::from_value::<Message>(value.clone()) {
        Ok(message) => Frame::Message(message),
        Err(_) => Frame::Other(value),
    }
}
