//! Stdio transport — reads JSON-RPC from stdin, writes to stdout.
//!
//! Requests are served concurrently, one task each, so a blocking wait does
//! not hold up the pushes that would satisfy it. A single writer task owns
//! the output stream and writes whole lines.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::ProtocolHandler;
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing;

const OUTBOUND_BUFFER: usize = 64;

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    handler: ProtocolHandler,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self { handler }
    }

    /// Run the transport loop until stdin closes.
    pub async fn run(&self) -> McpResult<()> {
        tracing::info!("Stdio transport started");
        self.run_on(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `reader`, answering on `writer`.
    ///
    /// On end of input every in-flight request is cancelled and its answer
    /// flushed before returning.
    pub async fn run_on<R, W>(&self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Value>(OUTBOUND_BUFFER);
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let mut tasks = JoinSet::new();

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let read_result = loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::info!("EOF on input, shutting down");
                    break Ok(());
                }
                Ok(_) => {}
                Err(e) => break Err(McpError::Io(e)),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match framing::parse_message(trimmed) {
                Ok(JsonRpcMessage::Request(request)) => {
                    let cancel = self.handler.track(&request).await;
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        let response = handler.serve(request, cancel).await;
                        let _ = tx.send(response).await;
                    });
                }
                Ok(msg) => {
                    if let Some(response) = self.handler.handle_message(msg).await {
                        let _ = tx.send(response).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    let _ = tx.send(framing::error_response(&e)).await;
                }
            }

            // Reap finished requests so the set does not grow unbounded.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Request task failed: {e}");
                }
            }
        };

        self.handler.cancel_all().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Request task failed: {e}");
            }
        }
        drop(tx);

        let write_result = writer_task
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        read_result.and(write_result)
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Value>) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let framed = framing::frame_message(&response)?;
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(McpError::Io)?;
        writer.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}
