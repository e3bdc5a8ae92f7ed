//! Test utilities for framecast-core.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! framecast-core = { version = "...", features = ["test-utils"] }
//! ```
//!
//! # Example
//!
//! ```rust
//! use framecast_core::test_utils::RecordingHandler;
//! use framecast_core::DelegationManager;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = DelegationManager::new();
//! let handler = RecordingHandler::new();
//!
//! manager.start(async { Ok::<_, String>(json!(1)) }, "one", handler.clone(), None);
//! handler.wait_for(1).await;
//!
//! assert_eq!(handler.calls()[0].1, Ok(json!(1)));
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::delegation::CompletionHandler;
use crate::frame::{decode_lines, Frame};
use crate::stream::FrameStream;
use crate::task::{TaskId, TaskOutcome};

/// A completion handler that records every call it receives.
///
/// Clones share the same record, so keep one clone and hand the others to
/// the code under test.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<(TaskId, TaskOutcome)>>>,
    notify: Arc<Notify>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(id, outcome)` received so far, in arrival order.
    pub fn calls(&self) -> Vec<(TaskId, TaskOutcome)> {
        self.calls.lock().clone()
    }

    /// Wait until at least `count` calls have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.calls.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl CompletionHandler for RecordingHandler {
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        self.calls.lock().push((id, outcome));
        self.notify.notify_waiters();
    }
}

/// Drain a frame stream into one string.
pub async fn collect_text(body: FrameStream) -> String {
    body.map(|line| match line {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(never) => match never {},
    })
    .collect::<Vec<_>>()
    .await
    .concat()
}

/// Drain a frame stream and decode it.
pub async fn collect_frames(body: FrameStream) -> Vec<Frame> {
    decode_lines(&collect_text(body).await)
}
