//! HTTP endpoints for framecast responders.
//!
//! This crate serves a [`Responder`] over HTTP: one POST endpoint streams its
//! frames as a line-delimited body, and a set of task endpoints exposes the
//! background work it delegated.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use framecast_server::{ChatRequest, FramecastRouter, RespondError, Responder, ResponseContext};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Responder for Hello {
//!     async fn respond(&self, _: ChatRequest, ctx: ResponseContext) -> Result<(), RespondError> {
//!         ctx.stream().text("Hello!").await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = FramecastRouter::new(Hello)
//!     .with_stream("/api/chat")
//!     .with_tasks("/api/tasks")
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub(crate) mod handler;
pub mod responder;
pub mod router;
pub(crate) mod state;

// Re-exports
pub use error::{BuildError, ServerError, ServerResult};
pub use responder::{ChatRequest, OutOfBandHandler, RespondError, Responder, ResponseContext};
pub use router::{FramecastRouter, DEFAULT_DRAIN_TIMEOUT};
