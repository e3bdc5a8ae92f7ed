//! Basic framecast server with a delegated tool call.
//!
//! Run with:
//! ```sh
//! cargo run -p framecast-server --example basic_server
//! ```
//!
//! Test with curl:
//! ```sh
//! curl -X POST http://localhost:3000/api/chat \
//!   -H "Content-Type: application/json" \
//!   -d '{"messages": [{"role": "user", "content": "Compare ACME to its peers"}]}' \
//!   -N
//! ```

use std::time::Duration;

use async_trait::async_trait;
use framecast_core::ToolCall;
use framecast_server::{ChatRequest, FramecastRouter, RespondError, Responder, ResponseContext};
use serde_json::{json, Map};

/// Answers with a short text, a table and one slow background lookup.
struct PeerComparison;

#[async_trait]
impl Responder for PeerComparison {
    async fn respond(&self, _: ChatRequest, ctx: ResponseContext) -> Result<(), RespondError> {
        ctx.stream().text("Looking up ACME's peers.").await?;

        let mut args = Map::new();
        args.insert("ticker".to_string(), json!("ACME"));
        ctx.delegate_tool_call(ToolCall::new("call-1", "peer_lookup", args), async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, String>(json!({"peers": ["INITECH", "GLOBEX", "UMBRELLA"]}))
        })
        .await;

        ctx.stream()
            .data(json!({
                "type": "table",
                "title": "Peer Comparison",
                "columns": ["ticker", "pe"],
                "rows": [["ACME", 14.2]],
            }))
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app = FramecastRouter::new(PeerComparison)
        .with_stream("/api/chat")
        .with_tasks("/api/tasks")
        .drain_timeout(Duration::from_secs(10))
        .on_out_of_band(|id, outcome| println!("task {} finished late: {:?}", id, outcome))
        .build()?;

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    println!("Server running at http://localhost:3000");
    println!("Stream endpoint: POST http://localhost:3000/api/chat");
    println!("Task endpoints: http://localhost:3000/api/tasks/:id");

    axum::serve(listener, app).await?;

    Ok(())
}
