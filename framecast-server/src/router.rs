//! Router builder for framecast HTTP endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use framecast_core::{DelegationManager, StreamConfig, TaskId, TaskOutcome};

use crate::error::BuildError;
use crate::handler::{acknowledge_task, cancel_task, get_task, list_tasks, stream_handler};
use crate::responder::{log_out_of_band, OutOfBandHandler, Responder};
use crate::state::AppState;

/// How long a finished response waits for its delegated tool results.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for configuring framecast HTTP endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use framecast_server::{FramecastRouter, Responder};
///
/// # async fn example(responder: impl Responder) -> Result<(), Box<dyn std::error::Error>> {
/// let app = FramecastRouter::new(responder)
///     .with_stream("/api/chat")
///     .with_tasks("/api/tasks")
///     .build()?;
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub struct FramecastRouter {
    responder: Arc<dyn Responder>,
    delegation: Option<Arc<DelegationManager>>,
    stream_path: Option<String>,
    tasks_path: Option<String>,
    stream_config: StreamConfig,
    drain_timeout: Duration,
    tool_timeout: Option<Duration>,
    out_of_band: OutOfBandHandler,
}

impl FramecastRouter {
    /// Create a new router builder with the given responder.
    pub fn new(responder: impl Responder) -> Self {
        Self::from_arc(Arc::new(responder))
    }

    /// Create a new router builder from a shared responder.
    pub fn from_arc(responder: Arc<dyn Responder>) -> Self {
        Self {
            responder,
            delegation: None,
            stream_path: None,
            tasks_path: None,
            stream_config: StreamConfig::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            tool_timeout: None,
            out_of_band: log_out_of_band(),
        }
    }

    /// Use an existing delegation manager.
    ///
    /// Share one manager with the rest of the application to look up or
    /// cancel tasks outside the HTTP routes. A fresh manager is created
    /// otherwise.
    pub fn with_delegation(mut self, delegation: Arc<DelegationManager>) -> Self {
        self.delegation = Some(delegation);
        self
    }

    /// Enable the stream endpoint (POST) at the specified path.
    pub fn with_stream(mut self, path: impl Into<String>) -> Self {
        self.stream_path = Some(path.into());
        self
    }

    /// Enable the task endpoints under the specified path.
    ///
    /// - `GET {path}` lists retained tasks
    /// - `GET {path}/:id` returns one task
    /// - `DELETE {path}/:id` cancels it
    /// - `POST {path}/:id/ack` acknowledges a finished task
    pub fn with_tasks(mut self, path: impl Into<String>) -> Self {
        self.tasks_path = Some(path.into());
        self
    }

    /// Set the buffering of each response stream.
    pub fn stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Set how long a finished response waits for delegated tool results
    /// before closing.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the timeout for tool calls delegated through the response context.
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Handle outcomes of tool calls that finished after their response
    /// closed. They are logged by default.
    pub fn on_out_of_band<F>(mut self, handler: F) -> Self
    where
        F: Fn(TaskId, TaskOutcome) + Send + Sync + 'static,
    {
        self.out_of_band = Arc::new(handler);
        self
    }

    /// Build the router with all configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoEndpoints`] if no endpoints were configured.
    pub fn build(self) -> Result<Router, BuildError> {
        if self.stream_path.is_none() && self.tasks_path.is_none() {
            return Err(BuildError::NoEndpoints);
        }

        let state = AppState {
            responder: self.responder,
            delegation: self.delegation.unwrap_or_default(),
            stream_config: self.stream_config,
            drain_timeout: self.drain_timeout,
            tool_timeout: self.tool_timeout,
            out_of_band: self.out_of_band,
        };
        let mut router = Router::new();

        if let Some(stream_path) = self.stream_path {
            router = router.route(&stream_path, post(stream_handler));
        }

        if let Some(tasks_path) = self.tasks_path {
            let tasks_path = tasks_path.trim_end_matches('/');
            router = router
                .route(tasks_path, get(list_tasks))
                .route(
                    &format!("{}/:id", tasks_path),
                    get(get_task).delete(cancel_task),
                )
                .route(&format!("{}/:id/ack", tasks_path), post(acknowledge_task));
        }

        Ok(router.with_state(state))
    }

    /// Build the router and nest it under a prefix path.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoEndpoints`] if no endpoints were configured.
    pub fn build_nested(self, prefix: impl Into<String>) -> Result<Router, BuildError> {
        Ok(Router::new().nest(&prefix.into(), self.build()?))
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
