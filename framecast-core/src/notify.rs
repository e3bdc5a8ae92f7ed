//! Delivery of task outcomes to whoever is waiting for them.
//!
//! A [`CompletionNotifier`] prefers the originating response stream: while it
//! is open, the outcome becomes the `ToolResult` frame answering the tool call
//! that started the work. Once the stream is gone the outcome goes to the
//! fallback handler instead, so a delegation can outlive its request.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::delegation::CompletionHandler;
use crate::stream::StreamMultiplexer;
use crate::task::{TaskId, TaskOutcome};

struct InStream {
    call_id: String,
    stream: StreamMultiplexer,
}

/// Routes one task outcome in-stream or out-of-band.
pub struct CompletionNotifier {
    target: Option<InStream>,
    fallback: Box<dyn CompletionHandler>,
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("call_id", &self.call_id())
            .field("attached", &self.target.is_some())
            .finish()
    }
}

impl CompletionNotifier {
    /// Deliver as the tool result for `call_id` on `stream`, or to `fallback`
    /// if the stream has closed by then.
    pub fn attached(
        call_id: impl Into<String>,
        stream: StreamMultiplexer,
        fallback: impl CompletionHandler,
    ) -> Self {
        Self {
            target: Some(InStream {
                call_id: call_id.into(),
                stream,
            }),
            fallback: Box::new(fallback),
        }
    }

    /// Always deliver to `fallback`.
    pub fn detached(fallback: impl CompletionHandler) -> Self {
        Self {
            target: None,
            fallback: Box::new(fallback),
        }
    }

    /// The tool call this notifier answers, if attached.
    pub fn call_id(&self) -> Option<&str> {
        self.target.as_ref().map(|target| target.call_id.as_str())
    }

    /// Deliver the outcome.
    ///
    /// Never fails: a closed stream is not an error, the fallback handler
    /// receives the outcome instead.
    pub async fn notify(self, id: TaskId, outcome: TaskOutcome) {
        let Self { target, fallback } = self;

        if let Some(InStream { call_id, stream }) = target {
            match stream.tool_result(call_id, tool_result_payload(&outcome)).await {
                Ok(()) => return,
                Err(e) => log::debug!(
                    "task {} finished after its stream ended ({}); delivering out of band",
                    id,
                    e
                ),
            }
        }

        fallback.on_complete(id, outcome).await;
    }
}

/// The `result` of the tool result frame. Failures are reported as
/// `{"error": message}` so every tool call is answered.
pub fn tool_result_payload(outcome: &TaskOutcome) -> Value {
    match outcome {
        Ok(value) => value.clone(),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

#[async_trait]
impl CompletionHandler for CompletionNotifier {
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        (*self).notify(id, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, ToolResult};
    use crate::stream::{StreamClosed, StreamConfig};
    use crate::task::TaskError;
    use crate::test_utils::{collect_frames, collect_text, RecordingHandler};
    use std::time::Duration;

    #[tokio::test]
    async fn test_attached_writes_tool_result() {
        let (stream, body) = StreamMultiplexer::channel(&StreamConfig::default());
        let handler = RecordingHandler::new();

        CompletionNotifier::attached("c1", stream.clone(), handler.clone())
            .notify(TaskId::new(), Ok(json!({"ok": true})))
            .await;
        stream.close().await;

        assert_eq!(
            collect_text(body).await,
            "a:{\"toolCallId\":\"c1\",\"result\":{\"ok\":true}}\n"
        );
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attached_reports_failure_as_error_result() {
        let (stream, body) = StreamMultiplexer::channel(&StreamConfig::default());

        CompletionNotifier::attached("c2", stream.clone(), PanickingFallback)
            .notify(
                TaskId::new(),
                Err(TaskError::TimedOut(Duration::from_secs(2))),
            )
            .await;
        stream.close().await;

        assert_eq!(
            collect_frames(body).await,
            vec![Frame::ToolResult(ToolResult::new(
                "c2",
                json!({"error": "timed out after 2s"})
            ))]
        );
    }

    #[tokio::test]
    async fn test_closed_stream_falls_back_out_of_band() {
        let (stream, _body) = StreamMultiplexer::channel(&StreamConfig::default());
        stream.close().await;
        let handler = RecordingHandler::new();
        let id = TaskId::new();

        CompletionNotifier::attached("c3", stream.clone(), handler.clone())
            .notify(id.clone(), Ok(json!(42)))
            .await;

        assert_eq!(handler.calls(), vec![(id, Ok(json!(42)))]);
        assert_eq!(stream.text("still closed").await, Err(StreamClosed));
    }

    #[tokio::test]
    async fn test_detached_goes_straight_to_fallback() {
        let handler = RecordingHandler::new();
        let id = TaskId::new();
        let notifier = CompletionNotifier::detached(handler.clone());
        assert_eq!(notifier.call_id(), None);

        notifier.notify(id.clone(), Err(TaskError::Cancelled)).await;

        assert_eq!(handler.calls(), vec![(id, Err(TaskError::Cancelled))]);
    }

    struct PanickingFallback;

    #[async_trait]
    impl CompletionHandler for PanickingFallback {
        async fn on_complete(self: Box<Self>, _id: TaskId, _outcome: TaskOutcome) {
            panic!("stream was open; fallback must not run");
        }
    }
}
