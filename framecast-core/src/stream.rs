//! Serialized frame output for one response stream.
//!
//! A [`StreamMultiplexer`] is the single owner of a response's physical
//! output. Any number of producers (the responder's own text generation,
//! completion notifiers for delegated work) hold clones of it and call
//! [`StreamMultiplexer::write`]; each call emits exactly one encoded line and
//! lines are never interleaved.
//!
//! ```
//! use framecast_core::{Frame, StreamConfig, StreamMultiplexer};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), framecast_core::StreamClosed> {
//! let (stream, mut body) = StreamMultiplexer::channel(&StreamConfig::default());
//!
//! stream.write(&Frame::text("hi")).await?;
//! stream.close().await;
//!
//! let line = body.next().await.unwrap().unwrap();
//! assert_eq!(&line[..], b"0:\"hi\"\n");
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::frame::{Frame, ToolCall, ToolResult};

/// Default number of encoded frames buffered between producers and the
/// consumer before writes start waiting.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// A write was attempted after the stream was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream closed")]
pub struct StreamClosed;

/// Configuration for channel-backed streams.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Frames buffered before `write` suspends the producer.
    pub capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl StreamConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer capacity (minimum 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

enum Transport {
    Channel(mpsc::Sender<Bytes>),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Transport {
    async fn send(&mut self, line: Bytes) -> bool {
        match self {
            Transport::Channel(tx) => tx.send(line).await.is_ok(),
            Transport::Writer(writer) => {
                let result = async {
                    writer.write_all(&line).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = &result {
                    log::debug!("stream transport write failed: {}", e);
                }
                result.is_ok()
            }
        }
    }

    async fn shutdown(self) {
        if let Transport::Writer(mut writer) = self {
            if let Err(e) = writer.shutdown().await {
                log::debug!("stream transport shutdown failed: {}", e);
            }
        }
    }
}

struct Inner {
    transport: Mutex<Option<Transport>>,
    closed: CancellationToken,
    written: AtomicU64,
}

/// Serializes frames from concurrent producers onto one output.
///
/// Clones share the same output. Writes are atomic with respect to each
/// other: the encoded line is handed to the transport while holding an
/// internal lock, and the call waits for the transport to accept it.
#[derive(Clone)]
pub struct StreamMultiplexer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("closed", &self.is_closed())
            .field("frames_written", &self.frames_written())
            .finish()
    }
}

impl StreamMultiplexer {
    /// Create a multiplexer backed by a bounded channel.
    ///
    /// Returns the multiplexer and the [`FrameStream`] its encoded lines come
    /// out of. When the buffer is full, `write` waits for the consumer.
    /// Dropping the `FrameStream` closes the multiplexer on the next write.
    pub fn channel(config: &StreamConfig) -> (Self, FrameStream) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let stream = Self::with_transport(Transport::Channel(tx));
        (
            stream,
            FrameStream {
                inner: ReceiverStream::new(rx),
            },
        )
    }

    /// Create a multiplexer that writes to an async byte sink.
    ///
    /// Every frame is written in full and flushed before the next one.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_transport(Transport::Writer(Box::new(writer)))
    }

    fn with_transport(transport: Transport) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(Some(transport)),
                closed: CancellationToken::new(),
                written: AtomicU64::new(0),
            }),
        }
    }

    /// Write one frame.
    ///
    /// Suspends while the transport applies backpressure. A write still
    /// waiting when [`close`](Self::close) is called gives up.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClosed`] if the stream was closed before or during the
    /// write, or the consumer went away. On a channel the frame is not written
    /// in that case; a writer transport may be left with a partial line.
    pub async fn write(&self, frame: &Frame) -> Result<(), StreamClosed> {
        if self.is_closed() {
            return Err(StreamClosed);
        }
        let line = frame.encode();

        let mut transport = self.inner.transport.lock().await;
        let Some(active) = transport.as_mut() else {
            return Err(StreamClosed);
        };

        let sent = tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => return Err(StreamClosed),
            sent = active.send(line) => sent,
        };
        if !sent {
            log::debug!("stream consumer went away; closing stream");
            self.inner.closed.cancel();
            transport.take();
            return Err(StreamClosed);
        }

        self.inner.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write a [`Frame::Text`].
    pub async fn text(&self, content: impl Into<String>) -> Result<(), StreamClosed> {
        self.write(&Frame::Text(content.into())).await
    }

    /// Write a [`Frame::Data`].
    pub async fn data(&self, payload: Value) -> Result<(), StreamClosed> {
        self.write(&Frame::Data(payload)).await
    }

    /// Write a [`Frame::ToolCall`].
    pub async fn tool_call(
        &self,
        call_id: impl Into<String>,
        name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Result<(), StreamClosed> {
        self.write(&Frame::ToolCall(ToolCall::new(call_id, name, args)))
            .await
    }

    /// Write a [`Frame::ToolResult`].
    pub async fn tool_result(
        &self,
        call_id: impl Into<String>,
        result: Value,
    ) -> Result<(), StreamClosed> {
        self.write(&Frame::ToolResult(ToolResult::new(call_id, result)))
            .await
    }

    /// Write a [`Frame::Error`].
    pub async fn error(&self, message: impl Into<String>) -> Result<(), StreamClosed> {
        self.write(&Frame::Error(message.into())).await
    }

    /// Close the stream.
    ///
    /// Writes waiting on backpressure fail with [`StreamClosed`], then the
    /// transport is released so the consumer sees end of stream. Later writes
    /// fail too. Calling `close` again does nothing.
    pub async fn close(&self) {
        self.inner.closed.cancel();
        let transport = self.inner.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
    }

    /// Whether the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of frames successfully written.
    pub fn frames_written(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }
}

/// Encoded frame lines produced by a channel-backed [`StreamMultiplexer`].
///
/// Items are `Result<Bytes, Infallible>` so the stream can be handed straight
/// to an HTTP body. The stream ends once the multiplexer is closed or every
/// clone of it is dropped.
pub struct FrameStream {
    inner: ReceiverStream<Bytes>,
}

impl Stream for FrameStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|line| line.map(Ok))
    }
}
