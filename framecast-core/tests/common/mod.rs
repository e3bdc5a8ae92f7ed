//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use framecast_core::{CompletionHandler, FrameStream, StreamMultiplexer, TaskId, TaskOutcome};
use futures::StreamExt;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// A completion handler that forwards every outcome to a channel.
pub struct ChannelHandler(pub mpsc::UnboundedSender<(TaskId, TaskOutcome)>);

#[async_trait]
impl CompletionHandler for ChannelHandler {
    async fn on_complete(self: Box<Self>, id: TaskId, outcome: TaskOutcome) {
        let _ = self.0.send((id, outcome));
    }
}

pub fn channel_handler() -> (
    impl Fn() -> ChannelHandler,
    mpsc::UnboundedReceiver<(TaskId, TaskOutcome)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move || ChannelHandler(tx.clone()), rx)
}

/// Read a body to the end as text.
pub async fn read_body(body: FrameStream) -> String {
    body.map(|line| match line {
        Ok(bytes) => String::from_utf8(bytes.to_vec()).expect("frames are utf-8"),
        Err(never) => match never {},
    })
    .collect::<Vec<_>>()
    .await
    .concat()
}

/// Wait until `stream` has written at least `count` frames.
pub async fn wait_for_frames(stream: &StreamMultiplexer, count: u64) {
    tokio::time::timeout(WAIT, async {
        while stream.frames_written() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("frames were not written in time");
}
