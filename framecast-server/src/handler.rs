//! HTTP handlers for the stream and task endpoints.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use framecast_core::{StreamMultiplexer, Task, TaskId};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::ServerResult;
use crate::responder::{ChatRequest, RespondError, ResponseContext};
use crate::state::AppState;

/// Header announcing the data stream protocol version to clients.
pub const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");

/// Handle a streamed response request.
///
/// Accepts POST with a [`ChatRequest`] body and returns the response frames
/// as a line-delimited body. The responder runs in its own task; once it
/// returns, the stream stays open until the tool calls it delegated have
/// been answered or the drain timeout passes.
pub async fn stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let request_id = request
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let (stream, body) = StreamMultiplexer::channel(&state.stream_config);
    let (in_flight, drained) = mpsc::channel::<()>(1);

    let ctx = ResponseContext::new(
        request_id.clone(),
        stream.clone(),
        state.delegation.clone(),
        in_flight,
        state.out_of_band.clone(),
        state.tool_timeout,
    );
    let responder = state.responder.clone();
    let drain_timeout = state.drain_timeout;

    tokio::spawn(async move {
        match responder.respond(request, ctx).await {
            Ok(()) => {}
            Err(RespondError::StreamClosed(_)) => {
                log::debug!("client left before response {} finished", request_id);
            }
            Err(e) => {
                log::warn!("response {} failed: {}", request_id, e);
                let _ = stream.error(e.to_string()).await;
            }
        }

        drain(&request_id, drained, drain_timeout).await;
        stream.close().await;
    });

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (DATA_STREAM_HEADER, "v1"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Wait until every in-flight delivery handle has been dropped.
async fn drain(request_id: &str, mut drained: mpsc::Receiver<()>, timeout: Duration) {
    if tokio::time::timeout(timeout, drained.recv()).await.is_err() {
        log::debug!(
            "response {} closing with tool calls still running after {:?}",
            request_id,
            timeout
        );
    }
}

/// List every retained task.
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.delegation.registry().list())
}

/// Snapshot of one task.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Task>> {
    let task = state.delegation.status(&TaskId::from(id))?;
    Ok(Json(task))
}

/// Cancel a task.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let cancelled = state.delegation.cancel(&TaskId::from(id))?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// Acknowledge a finished task so it is evicted now.
pub async fn acknowledge_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let acknowledged = state.delegation.acknowledge(&TaskId::from(id))?;
    Ok(Json(json!({ "acknowledged": acknowledged })))
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
