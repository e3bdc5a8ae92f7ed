//! The seam between the HTTP layer and whatever produces a response.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use framecast_core::{
    CompletionHandler, DelegationManager, StreamClosed, StreamMultiplexer, TaskId, TaskOutcome,
    ToolCall,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Request body for the stream endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Client-supplied conversation or request id.
    #[serde(default)]
    pub id: Option<String>,
    /// Conversation so far, passed through to the responder as-is.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Why a responder stopped before finishing its response.
#[derive(Debug, thiserror::Error)]
pub enum RespondError {
    /// The client went away.
    #[error(transparent)]
    StreamClosed(#[from] StreamClosed),

    /// The responder failed; the message is sent to the client as an error
    /// frame.
    #[error("{0}")]
    Failed(String),
}

impl RespondError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Produces the frames of one streamed response.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use framecast_server::{ChatRequest, RespondError, Responder, ResponseContext};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Responder for Echo {
///     async fn respond(
///         &self,
///         request: ChatRequest,
///         ctx: ResponseContext,
///     ) -> Result<(), RespondError> {
///         for message in &request.messages {
///             ctx.stream().text(message.to_string()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Write the response for `request` through `ctx`.
    ///
    /// The stream stays open after this returns until the tool calls
    /// delegated through `ctx` have been answered (or the drain timeout
    /// passes).
    async fn respond(&self, request: ChatRequest, ctx: ResponseContext)
        -> Result<(), RespondError>;
}

/// Receives task outcomes that could not be delivered on their stream.
pub type OutOfBandHandler = Arc<dyn Fn(TaskId, TaskOutcome) + Send + Sync>;

pub(crate) fn log_out_of_band() -> OutOfBandHandler {
    Arc::new(|id: TaskId, outcome: TaskOutcome| match outcome {
        Ok(_) => log::info!("task {} completed after its stream ended", id),
        Err(e) => log::info!("task {} ended after its stream ended: {}", id, e),
    })
}

/// Everything a responder needs to answer one request.
pub struct ResponseContext {
    request_id: String,
    stream: StreamMultiplexer,
    delegation: Arc<DelegationManager>,
    in_flight: mpsc::Sender<()>,
    out_of_band: OutOfBandHandler,
    tool_timeout: Option<Duration>,
}

impl ResponseContext {
    pub(crate) fn new(
        request_id: String,
        stream: StreamMultiplexer,
        delegation: Arc<DelegationManager>,
        in_flight: mpsc::Sender<()>,
        out_of_band: OutOfBandHandler,
        tool_timeout: Option<Duration>,
    ) -> Self {
        Self {
            request_id,
            stream,
            delegation,
            in_flight,
            out_of_band,
            tool_timeout,
        }
    }

    /// The request id, generated when the client sent none.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The response stream.
    pub fn stream(&self) -> &StreamMultiplexer {
        &self.stream
    }

    /// The shared delegation manager.
    pub fn delegation(&self) -> &Arc<DelegationManager> {
        &self.delegation
    }

    /// Announce a tool call and run its work in the background.
    ///
    /// The tool result is written to this response if the work finishes
    /// while the stream is open. Otherwise the outcome goes to the router's
    /// out-of-band handler.
    pub async fn delegate_tool_call<F, E>(&self, call: ToolCall, work: F) -> TaskId
    where
        F: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let fallback = InFlight {
            out_of_band: self.out_of_band.clone(),
            _pending: self.in_flight.clone(),
        };
        self.delegation
            .delegate_tool_call(&self.stream, call, work, fallback, self.tool_timeout)
            .await
    }
}

/// Fallback for a delegated tool call. While it is alive the response it
/// belongs to keeps draining.
struct InFlight {
    out_of_band: OutOfBandHandler,
    _pending: mpsc::Sender<()>,
}

#[async_trait]
impl CompletionHandler for InFlight {
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        (self.out_of_band)(id, outcome)
    }
}
