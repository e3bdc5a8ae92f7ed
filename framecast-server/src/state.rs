//! Application state for the framecast server.

use std::sync::Arc;
use std::time::Duration;

use framecast_core::{DelegationManager, StreamConfig};

use crate::responder::{OutOfBandHandler, Responder};

/// Shared application state, cloned for each request handler.
#[derive(Clone)]
pub struct AppState {
    pub responder: Arc<dyn Responder>,
    pub delegation: Arc<DelegationManager>,
    pub stream_config: StreamConfig,
    /// How long a finished response waits for its delegated tool results.
    pub drain_timeout: Duration,
    /// Timeout for tool calls delegated through the response context.
    pub tool_timeout: Option<Duration>,
    pub out_of_band: OutOfBandHandler,
}
