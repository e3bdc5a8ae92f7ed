//! Encoding and decoding of single frame lines.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FrameTag, ToolCall, ToolResult};

/// Default maximum line length accepted by [`FrameCodec`]: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// A line that could not be turned into a [`Frame`].
///
/// Every variant carries the offending raw line so consumers can report it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line is not valid UTF-8.
    #[error("frame line is not valid UTF-8: {line}")]
    InvalidUtf8 { line: String },

    /// The line has no `:` after the tag.
    #[error("frame line has no tag separator: {line}")]
    MissingSeparator { line: String },

    /// The tag is not one of the known wire tags.
    #[error("unknown frame tag '{tag}': {line}")]
    UnknownTag { tag: String, line: String },

    /// The payload is not valid JSON for the tag.
    #[error("invalid {tag} payload ({reason}): {line}")]
    InvalidPayload {
        tag: FrameTag,
        reason: String,
        line: String,
    },
}

impl DecodeError {
    /// The raw line that failed to decode.
    pub fn line(&self) -> &str {
        match self {
            Self::InvalidUtf8 { line }
            | Self::MissingSeparator { line }
            | Self::UnknownTag { line, .. }
            | Self::InvalidPayload { line, .. } => line,
        }
    }
}

/// Framing-level failures of [`FrameCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// A line grew past the configured maximum without a newline.
    #[error("frame line too long: exceeded {max} bytes")]
    LineTooLong { max: usize },

    /// The underlying transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Frame {
    /// Encode this frame as one newline-terminated wire line.
    pub fn encode(&self) -> Bytes {
        encode(self)
    }

    /// Decode one wire line (with or without its trailing newline).
    pub fn decode(line: &[u8]) -> Result<Frame, DecodeError> {
        decode(line)
    }
}

/// Encode a frame as `<tag>:<json>\n`.
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = Vec::with_capacity(64);
    let mut tag = [0u8; 4];
    buf.extend_from_slice(frame.tag().as_char().encode_utf8(&mut tag).as_bytes());
    buf.push(b':');

    match frame {
        Frame::Text(content) => push_json(&mut buf, content),
        Frame::Data(payload) => push_json(&mut buf, std::slice::from_ref(payload)),
        Frame::Error(message) => push_json(&mut buf, message),
        Frame::ToolCall(call) => push_json(&mut buf, call),
        Frame::ToolResult(result) => push_json(&mut buf, result),
    }

    buf.push(b'\n');
    Bytes::from(buf)
}

fn push_json<T: Serialize + ?Sized>(buf: &mut Vec<u8>, value: &T) {
    // Payloads are strings and JSON values with string keys; writing them
    // into a Vec cannot fail.
    if let Err(e) = serde_json::to_writer(&mut *buf, value) {
        log::error!("frame payload failed to serialize: {}", e);
        buf.extend_from_slice(b"null");
    }
}

/// Decode one wire line into a frame.
///
/// The tag is matched first; the remainder is parsed by the decoder for that
/// tag. A trailing `\n` or `\r\n` is ignored.
pub fn decode(line: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8 {
        line: String::from_utf8_lossy(line).into_owned(),
    })?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let text = text.strip_suffix('\r').unwrap_or(text);

    let (tag, payload) = text
        .split_once(':')
        .ok_or_else(|| DecodeError::MissingSeparator {
            line: text.to_string(),
        })?;

    let mut chars = tag.chars();
    let tag = match (chars.next(), chars.next()) {
        (Some(c), None) => FrameTag::from_char(c),
        _ => None,
    }
    .ok_or_else(|| DecodeError::UnknownTag {
        tag: tag.to_string(),
        line: text.to_string(),
    })?;

    decode_payload(tag, payload).map_err(|reason| DecodeError::InvalidPayload {
        tag,
        reason,
        line: text.to_string(),
    })
}

fn decode_payload(tag: FrameTag, payload: &str) -> Result<Frame, String> {
    match tag {
        FrameTag::Text => parse::<String>(payload).map(Frame::Text),
        FrameTag::Error => parse::<String>(payload).map(Frame::Error),
        FrameTag::Data => {
            let items = parse::<Vec<Value>>(payload)?;
            let [item]: [Value; 1] = items.try_into().map_err(|items: Vec<Value>| {
                format!("expected exactly one element, found {}", items.len())
            })?;
            Ok(Frame::Data(item))
        }
        FrameTag::ToolCall => parse::<ToolCall>(payload).map(Frame::ToolCall),
        FrameTag::ToolResult => parse::<ToolResult>(payload).map(Frame::ToolResult),
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T, String> {
    serde_json::from_str(payload).map_err(|e| e.to_string())
}

/// Decode a complete body of frame lines for display.
///
/// Lines that fail to decode are replaced in place by a single
/// [`Frame::Error`] describing the failure; every other frame is kept in
/// order. Blank lines are skipped.
pub fn decode_lines(text: &str) -> Vec<Frame> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| decode(line.as_bytes()).unwrap_or_else(|e| Frame::Error(e.to_string())))
        .collect()
}

/// Line codec for reading and writing frames over a byte transport.
///
/// Use with [`tokio_util::codec::FramedRead`] and
/// [`tokio_util::codec::FramedWrite`]. The decoder yields
/// `Result<Frame, DecodeError>` items, so one malformed line is reported and
/// the stream carries on. Only framing failures (oversized line, I/O) end the
/// stream with a [`CodecError`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_line_bytes: usize,
}

impl FrameCodec {
    /// Create a codec with the default line limit.
    pub fn new() -> Self {
        Self::new_with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_line_bytes`.
    pub fn new_with_max_length(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }

    /// The maximum accepted line length in bytes.
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, DecodeError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_line_bytes {
                    return Err(CodecError::LineTooLong {
                        max: self.max_line_bytes,
                    });
                }
                return Ok(None);
            };
            if newline > self.max_line_bytes {
                return Err(CodecError::LineTooLong {
                    max: self.max_line_bytes,
                });
            }

            let line = src.split_to(newline + 1);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(decode(&line)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = Decoder::decode(self, src)? {
            return Ok(Some(item));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        // Final line without a trailing newline.
        let line = src.split_to(src.len());
        Ok(Some(decode(&line)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode(&frame));
        Ok(())
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode(frame));
        Ok(())
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
