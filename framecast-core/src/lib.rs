//! # Framecast
//!
//! Streaming response frames and background task delegation for agent
//! backends.
//!
//! An agent answering one HTTP request often produces several kinds of
//! output at once: text, structured data for the client to render, tool
//! invocations and their results, and errors. Framecast multiplexes all of
//! them onto one line-delimited body, and lets slow tool work run in the
//! background while the response keeps streaming.
//!
//! ## Quick Start
//!
//! ```
//! use framecast_core::{
//!     DelegationManager, Frame, StreamConfig, StreamMultiplexer, TaskId, TaskOutcome, TaskStatus,
//!     ToolCall,
//! };
//! use serde_json::{json, Map};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = DelegationManager::new();
//! // `body` is what gets handed to the HTTP response.
//! let (stream, _body) = StreamMultiplexer::channel(&StreamConfig::default());
//!
//! stream.write(&Frame::text("hi")).await.unwrap();
//! let id = manager
//!     .delegate_tool_call(
//!         &stream,
//!         ToolCall::new("c1", "lookup", Map::new()),
//!         async { Ok::<_, String>(json!({"ok": true})) },
//!         |_id: TaskId, _outcome: TaskOutcome| {},
//!         None,
//!     )
//!     .await;
//!
//! let task = manager
//!     .await_completion(&id, std::time::Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! assert_eq!(task.status, TaskStatus::Completed);
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: the frame model and its wire codec
//! - [`stream`]: the per-response [`StreamMultiplexer`]
//! - [`task`]: task records and the [`TaskRegistry`]
//! - [`delegation`]: the [`DelegationManager`] and completion handlers
//! - [`notify`]: in-stream or out-of-band delivery of task outcomes
//!
//! ## Feature Flags
//!
//! - `test-utils` - recording handlers and frame collection helpers

pub mod delegation;
pub mod frame;
pub mod notify;
pub mod stream;
pub mod task;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use delegation::{
    CompletionHandler, DelegationConfig, DelegationManager, IgnoreOutcome, TaskContext,
};
pub use frame::{
    check_tool_correlation, decode, decode_lines, encode, CodecError, CorrelationError,
    DecodeError, Frame, FrameCodec, FrameTag, ToolCall, ToolResult, DEFAULT_MAX_LINE_BYTES,
};
pub use notify::CompletionNotifier;
pub use stream::{
    FrameStream, StreamClosed, StreamConfig, StreamMultiplexer, DEFAULT_STREAM_CAPACITY,
};
pub use task::{
    RegistryConfig, RegistryError, Task, TaskError, TaskId, TaskOutcome, TaskRegistry,
    TaskStatus, TaskTransition, Transition, DEFAULT_MAX_RETAINED, DEFAULT_RETENTION,
};
