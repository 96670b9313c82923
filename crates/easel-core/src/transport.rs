//! Message transport over a language server's raw byte streams.
//!
//! The execution layer does not interpret protocol messages. It only needs
//! a transport to perform the graceful shutdown handshake before the server
//! process is killed, which is what [`ExternalTransport`] captures.
//!
//! [`LspTransport`] is a small implementation of the wire framing:
//!
//! ```text
//! Content-Length: <n>\r\n
//! [other headers]\r\n
//! \r\n
//! <n bytes of UTF-8 JSON>
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::session::ServerStreams;

/// Largest message body accepted from a server.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// The part of a message transport the session lifecycle depends on.
#[async_trait]
pub trait ExternalTransport: Send + Sync {
    /// Ask the server to shut down gracefully. Returns once the handshake
    /// has completed; the caller bounds how long it waits.
    async fn shutdown(&self) -> Result<()>;
}

/// Content-Length framed JSON-RPC transport.
///
/// Requests are answered in a single-flight manner: [`LspTransport::request`]
/// holds the read side until the matching response arrives and discards
/// anything else the server sends in the meantime. That is enough for the
/// lifecycle handshake and for probing a server; a full client would route
/// messages by id instead.
pub struct LspTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
    next_id: AtomicI64,
}

impl LspTransport<tokio::process::ChildStdout, tokio::process::ChildStdin> {
    /// Build a transport over a started session's streams.
    pub fn from_streams(streams: ServerStreams) -> Self {
        Self::new(streams.stdout, streams.stdin)
    }
}

impl<R, W> LspTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            next_id: AtomicI64::new(1),
        }
    }

    /// Write one framed message.
    pub async fn send(&self, message: &Value) -> Result<()> {
        let body = serde_json::to_vec(message)
            .map_err(|e| Error::Transport(format!("failed to encode message: {e}")))?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &body).await
    }

    /// Read the next message. `Ok(None)` means the server closed its output.
    pub async fn recv(&self) -> Result<Option<Value>> {
        let mut reader = self.reader.lock().await;
        Self::recv_locked(&mut reader).await
    }

    async fn recv_locked(reader: &mut BufReader<R>) -> Result<Option<Value>> {
        let Some(body) = read_frame(reader).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&body)
            .map_err(|e| Error::Transport(format!("malformed message body: {e}")))?;
        Ok(Some(value))
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }
        self.send(&message).await
    }

    /// Send a request and wait for the response with the same id.
    ///
    /// Returns the `result` member. An `error` member becomes
    /// [`Error::Transport`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }

        let mut reader = self.reader.lock().await;
        self.send(&message).await?;

        loop {
            let Some(reply) = Self::recv_locked(&mut reader).await? else {
                return Err(Error::Transport(format!(
                    "server closed its output while awaiting {method:?} response"
                )));
            };
            if reply.get("id").and_then(Value::as_i64) != Some(id) || reply.get("method").is_some()
            {
                trace!(method, "skipping unrelated message while awaiting response");
                continue;
            }
            if let Some(error) = reply.get("error") {
                return Err(Error::Transport(format!("{method} failed: {error}")));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }
}

#[async_trait]
impl<R, W> ExternalTransport for LspTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn shutdown(&self) -> Result<()> {
        self.request("shutdown", None).await?;
        self.notify("exit", None).await?;
        debug!("language server acknowledged shutdown");
        Ok(())
    }
}

/// Write `body` with its `Content-Length` header.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let io = |e| Error::io("failed to write message to server", e);
    writer.write_all(header.as_bytes()).await.map_err(io)?;
    writer.write_all(body).await.map_err(io)?;
    writer.flush().await.map_err(io)
}

/// Read one frame body. Returns `Ok(None)` on a clean EOF before any header.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::io("failed to read message header", e))?;
        if n == 0 {
            if saw_header {
                return Err(Error::Transport("stream ended inside message header".into()));
            }
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            // Tolerate stray blank lines between messages.
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|e| {
                    Error::Transport(format!("invalid Content-Length {:?}: {e}", value.trim()))
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let len = content_length
        .ok_or_else(|| Error::Transport("message header has no Content-Length".into()))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "Content-Length {len} exceeds limit of {MAX_FRAME_LEN} bytes"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::io("failed to read message body", e))?;
    Ok(Some(body))
}
