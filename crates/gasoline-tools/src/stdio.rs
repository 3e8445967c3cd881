//! JSON-RPC over stdio
//!
//! Messages arrive either one per line or with LSP-style
//! `Content-Length` headers. Each response goes back in the framing its
//! request used, as exactly one payload followed by a flush. Nothing else
//! is ever written to the output stream.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::dispatcher::McpHandler;
use crate::protocol::{JsonRpcResponse, INTERNAL_ERROR};

/// Client id used for every stdio request
pub const STDIO_CLIENT_ID: &str = "stdio";

/// Framing of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-terminated JSON
    Line,
    /// `Content-Length` headers, blank line, body
    ContentLength,
}

/// Read one message. `Ok(None)` at end of input.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<(String, Framing)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(length) = content_length(trimmed) else {
            return Ok(Some((trimmed.to_string(), Framing::Line)));
        };

        // Remaining headers end at the first blank line
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                break;
            }
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        let body = String::from_utf8(body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        return Ok(Some((body, Framing::ContentLength)));
    }
}

fn content_length(header: &str) -> Option<usize> {
    let (name, value) = header.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse().ok()
}

/// Write one framed payload and flush
pub async fn write_message<W>(writer: &mut W, payload: &str, framing: Framing) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Line => {
            writer.write_all(payload.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                payload.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(payload.as_bytes()).await?;
        }
    }
    writer.flush().await
}

/// Serve JSON-RPC until the input closes
pub async fn serve<R, W>(handler: Arc<McpHandler>, mut reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("MCP stdio bridge started");
    while let Some((message, framing)) = read_message(&mut reader).await? {
        let dispatcher = Arc::clone(&handler);
        let response = tokio::task::spawn_blocking(move || {
            dispatcher.handle_message(&message, STDIO_CLIENT_ID)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "stdio request handler panicked");
            Some(JsonRpcResponse::err(None, INTERNAL_ERROR, "Internal error"))
        });

        let Some(response) = response else {
            debug!("notification handled, no response");
            continue;
        };
        let payload = serde_json::to_string(&response)?;
        write_message(&mut writer, &payload, framing).await?;
    }
    info!("MCP stdio bridge input closed");
    Ok(())
}

/// Serve on the process's stdin and stdout
pub async fn serve_stdio(handler: Arc<McpHandler>) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(handler, stdin, tokio::io::stdout()).await
}
