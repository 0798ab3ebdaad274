//! Line-delimited JSON tool server.
//!
//! Each input line is `{"name": "...", "arguments": {...}}` with an optional
//! `id` that is echoed back. Each output line is the [`ToolResponse`] for that
//! request. Blank lines are skipped and stdout carries nothing else.

use crate::error::ArbeitError;
use crate::tools::{Dispatcher, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Option<Value>,
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct ToolReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(flatten)]
    response: ToolResponse,
}

/// Serve requests from stdin until it closes.
pub async fn run(dispatcher: Dispatcher) -> io::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(dispatcher, stdin, stdout).await
}

pub async fn serve<R, W>(mut dispatcher: Dispatcher, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(root = %dispatcher.root().display(), "Tool server started");

    let mut lines = reader.lines();
    let mut handled = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => ToolReply {
                response: dispatcher.call(&request.name, request.arguments).await,
                id: request.id,
            },
            Err(e) => {
                tracing::warn!("Malformed request line: {}", e);
                ToolReply {
                    id: None,
                    response: ToolResponse::failure(&ArbeitError::InvalidInput(format!(
                        "malformed request: {}",
                        e
                    ))),
                }
            },
        };

        let encoded = serde_json::to_string(&reply)?;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        handled += 1;
    }

    tracing::info!(requests = handled, "Tool server stopped");
    Ok(())
}
