//! Protocol frames and their line-oriented wire codec.
//!
//! A response stream is a sequence of frames, one per line. Each line is a
//! one-character tag, a colon, and a compact JSON payload:
//!
//! | Tag | Frame | Payload |
//! |-----|-------|---------|
//! | `0` | [`Frame::Text`] | JSON string |
//! | `2` | [`Frame::Data`] | one-element JSON array holding the payload |
//! | `3` | [`Frame::Error`] | JSON string |
//! | `9` | [`Frame::ToolCall`] | `{"toolCallId", "toolName", "args"}` |
//! | `a` | [`Frame::ToolResult`] | `{"toolCallId", "result"}` |

mod codec;

pub use codec::{
    decode, decode_lines, encode, CodecError, DecodeError, FrameCodec, DEFAULT_MAX_LINE_BYTES,
};

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One unit of the streaming protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A chunk of natural-language content.
    Text(String),
    /// One structured object (chart, table, widget description).
    Data(Value),
    /// A request to invoke a named capability.
    ToolCall(ToolCall),
    /// The outcome of an earlier [`Frame::ToolCall`] on the same stream.
    ToolResult(ToolResult),
    /// A failure notice.
    Error(String),
}

impl Frame {
    /// Create a text frame.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    /// Create an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// The wire tag for this frame.
    pub fn tag(&self) -> FrameTag {
        match self {
            Self::Text(_) => FrameTag::Text,
            Self::Data(_) => FrameTag::Data,
            Self::ToolCall(_) => FrameTag::ToolCall,
            Self::ToolResult(_) => FrameTag::ToolResult,
            Self::Error(_) => FrameTag::Error,
        }
    }
}

/// Payload of a [`Frame::ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id echoed by the matching [`ToolResult`].
    #[serde(rename = "toolCallId")]
    pub call_id: String,
    /// Name of the capability being invoked.
    #[serde(rename = "toolName")]
    pub name: String,
    /// Arguments for the invocation.
    pub args: Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call.
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Payload of a [`Frame::ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the [`ToolCall`] this result answers.
    #[serde(rename = "toolCallId")]
    pub call_id: String,
    /// Result value.
    pub result: Value,
}

impl ToolResult {
    /// Create a tool result.
    pub fn new(call_id: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            result,
        }
    }
}

/// Wire tags, one per frame variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTag {
    Text,
    Data,
    Error,
    ToolCall,
    ToolResult,
}

impl FrameTag {
    /// Every tag, in wire order.
    pub const ALL: [FrameTag; 5] = [
        FrameTag::Text,
        FrameTag::Data,
        FrameTag::Error,
        FrameTag::ToolCall,
        FrameTag::ToolResult,
    ];

    /// The tag character as written on the wire.
    pub fn as_char(self) -> char {
        match self {
            Self::Text => '0',
            Self::Data => '2',
            Self::Error => '3',
            Self::ToolCall => '9',
            Self::ToolResult => 'a',
        }
    }

    /// Look up the tag for a wire character.
    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_char() == c)
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Data => "data",
            Self::Error => "error",
            Self::ToolCall => "tool-call",
            Self::ToolResult => "tool-result",
        };
        f.write_str(name)
    }
}

/// A tool result that does not answer any earlier tool call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool result at position {position} references unknown call '{call_id}'")]
pub struct CorrelationError {
    /// Index of the offending frame.
    pub position: usize,
    /// The unmatched call id.
    pub call_id: String,
}

/// Check that every tool result references a tool call emitted earlier in
/// the same sequence of frames.
pub fn check_tool_correlation<'a>(
    frames: impl IntoIterator<Item = &'a Frame>,
) -> Result<(), CorrelationError> {
    let mut announced = HashSet::new();
    for (position, frame) in frames.into_iter().enumerate() {
        match frame {
            Frame::ToolCall(call) => {
                announced.insert(call.call_id.as_str());
            }
            Frame::ToolResult(result) if !announced.contains(result.call_id.as_str()) => {
                return Err(CorrelationError {
                    position,
                    call_id: result.call_id.clone(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}
