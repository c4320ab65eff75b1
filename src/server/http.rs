//! Upgrade an HTTP `CONNECT` request into a raw RPC byte stream.
//!
//! This crate has no dependency on a general HTTP stack, so the two
//! request/response lines this tunnel actually needs — the `CONNECT`
//! request line and the `200 Connected` status line — are matched by hand
//! against fixed strings rather than parsed with a full HTTP library.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

use super::Server;

/// Default path the RPC tunnel is registered on.
pub const RPC_PATH: &str = "/_geerpc_";
/// Informational path; connecting to it never upgrades to RPC.
pub const DEBUG_PATH: &str = "/debug/geerpc";

/// Exact status line both sides agree means "tunnel established".
pub const CONNECTED_STATUS: &str = "200 Connected to Gee RPC";

struct RequestLine {
    method: String,
    path: String,
}

/// Read an HTTP/1.x request line and drain headers up to the blank line
/// that terminates them. `reader` keeps any bytes buffered past that point
/// (there shouldn't be any for a bodyless `CONNECT`), so the same buffered
/// stream can be handed straight to [`Server::serve_conn`] afterward with no
/// framing hazard at the Option preamble.
async fn read_request_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<RequestLine> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::protocol("connection closed before a request line"));
    }
    loop {
        let mut next = String::new();
        if reader.read_line(&mut next).await? == 0 || next.trim().is_empty() {
            break;
        }
    }
    let mut parts = line.trim_end().splitn(3, ' ');
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    Ok(RequestLine { method, path })
}

impl Server {
    /// Accept connections from `listener`, upgrading `CONNECT {rpc_path}`
    /// requests into RPC connections and answering everything else as an
    /// ordinary (tiny) HTTP response.
    pub async fn serve_http(self: Arc<Self>, listener: tokio::net::TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "rpc server: accept error");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                tracing::debug!(%addr, "rpc server: accepted http connection");
                server.serve_http_conn(stream).await;
            });
        }
    }

    async fn serve_http_conn(self: Arc<Self>, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let request = match read_request_line(&mut reader).await {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "rpc server: malformed http request");
                return;
            }
        };

        if request.path == DEBUG_PATH {
            let _ = write_debug_page(&mut reader, self.registry.as_ref()).await;
            return;
        }

        if request.method != "CONNECT" || request.path != RPC_PATH {
            let _ = write_method_not_allowed(&mut reader).await;
            return;
        }

        if let Err(err) = write_connected(&mut reader).await {
            tracing::warn!(error = %err, "rpc server: failed to write CONNECT response");
            return;
        }

        self.serve_conn(reader).await;
    }
}

async fn write_connected<W: AsyncWriteExt + Unpin>(stream: &mut W) -> Result<()> {
    stream
        .write_all(format!("HTTP/1.0 {CONNECTED_STATUS}\n\n").as_bytes())
        .await?;
    Ok(())
}

async fn write_method_not_allowed<W: AsyncWriteExt + Unpin>(stream: &mut W) -> Result<()> {
    stream
        .write_all(b"HTTP/1.0 405 Method Not Allowed\nContent-Type: text/plain; charset=utf-8\n\n405 must CONNECT\n")
        .await?;
    Ok(())
}

async fn write_debug_page<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    _registry: &crate::service::ServiceRegistry,
) -> Result<()> {
    stream
        .write_all(b"HTTP/1.0 200 OK\nContent-Type: text/plain; charset=utf-8\n\ngeerpc debug: registered services are not enumerable without reflection\n")
        .await?;
    Ok(())
}
