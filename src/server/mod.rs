//! Accept connections, negotiate options, dispatch requests, enforce
//! per-connection handle timeouts.

mod http;

pub use http::{CONNECTED_STATUS, DEBUG_PATH, RPC_PATH};

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::codec::{Codec, CodecKind, CodecWriter};
use crate::error::Result;
use crate::option::{read_options, Header, MAGIC_NUMBER};
use crate::service::{Service, ServiceRegistry};

/// Body placeholder sent alongside an error `Header`: there is no reply
/// payload, only the error text the `Header` itself carries.
const INVALID_BODY: () = ();

/// A GeeRPC server: one shared [`ServiceRegistry`] served over any number of
/// accepted connections.
pub struct Server {
    registry: Arc<ServiceRegistry>,
}

/// Builds a [`Server`] by registering services up front.
///
/// An explicit, owned builder rather than a shared package-level default —
/// tests can stand up as many independent servers in one process as they like.
#[derive(Default)]
pub struct ServerBuilder {
    registry: ServiceRegistry,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Returns an error if the name is already taken.
    pub fn add_service(self, service: Service) -> Result<Self> {
        self.registry.register(service)?;
        Ok(self)
    }

    pub fn build(self) -> Arc<Server> {
        Arc::new(Server {
            registry: Arc::new(self.registry),
        })
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accept connections from `listener` forever.
    ///
    /// A single misbehaving client must never stop the server: every
    /// accepted connection is served on its own task, and an accept error
    /// is logged and does not end the loop.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
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
                tracing::debug!(%addr, "rpc server: accepted connection");
                server.serve_conn(stream).await;
            });
        }
    }

    /// Negotiate and serve a single already-accepted connection.
    pub async fn serve_conn<S>(self: Arc<Self>, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let opt = match read_options(&mut stream).await {
            Ok(opt) => opt,
            Err(err) => {
                tracing::warn!(error = %err, "rpc server: options error");
                return;
            }
        };
        if opt.magic_number != MAGIC_NUMBER {
            tracing::warn!(magic_number = opt.magic_number, "rpc server: invalid magic number");
            return;
        }
        let codec_kind = match CodecKind::by_name(&opt.codec_type) {
            Ok(kind) => kind,
            Err(err) => {
                tracing::warn!(error = %err, "rpc server: invalid codec type");
                return;
            }
        };

        let codec = Codec::new(stream, codec_kind);
        self.serve_codec(codec, opt.handle_timeout).await;
    }

    async fn serve_codec<S>(self: Arc<Self>, codec: Codec<S>, handle_timeout: Duration)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = codec.split();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(err) => {
                    if !err.is_eof() {
                        tracing::warn!(error = %err, "rpc server: read header error");
                    }
                    break;
                }
            };

            match self.registry.find(&header.service_method) {
                Ok((service, method)) => {
                    let arg_bytes = match reader.read_raw_body().await {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            tracing::warn!(error = %err, "rpc server: read body error");
                            break;
                        }
                    };
                    let writer = Arc::clone(&writer);
                    let codec_kind = reader.kind();
                    handlers.spawn(handle_request(
                        service,
                        method,
                        codec_kind,
                        arg_bytes,
                        header,
                        writer,
                        handle_timeout,
                    ));
                }
                Err(err) => {
                    if let Err(io_err) = reader.discard_body().await {
                        tracing::warn!(error = %io_err, "rpc server: discard body error");
                        break;
                    }
                    let mut error_header = header;
                    error_header.error = err.to_string();
                    send_invalid(&writer, error_header).await;
                }
            }
        }

        while handlers.join_next().await.is_some() {}
        let mut writer = writer.lock().await;
        let _ = writer.close().await;
    }
}

/// Invoke one request, racing the configured handle timeout, and send the
/// response. The method runs on a blocking-pool task so a handler that does
/// real blocking work (or sleeps past the handle timeout) never stalls the
/// executor; when the timeout wins the race the task is simply left running
/// in the background and its eventual output is discarded.
async fn handle_request<W>(
    service: Arc<Service>,
    method: String,
    codec_kind: CodecKind,
    arg_bytes: Vec<u8>,
    header: Header,
    writer: Arc<Mutex<CodecWriter<W>>>,
    handle_timeout: Duration,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let invocation = tokio::task::spawn_blocking(move || service.invoke(&method, codec_kind, &arg_bytes));

    if handle_timeout.is_zero() {
        let result = invocation.await;
        send_result(&writer, header, result).await;
        return;
    }

    match tokio::time::timeout(handle_timeout, invocation).await {
        Ok(result) => send_result(&writer, header, result).await,
        Err(_) => {
            let mut header = header;
            header.error = format!("rpc server: request handle timeout: expect within {handle_timeout:?}");
            send_invalid(&writer, header).await;
        }
    }
}

async fn send_result<W>(
    writer: &Arc<Mutex<CodecWriter<W>>>,
    mut header: Header,
    result: std::result::Result<Result<Vec<u8>>, tokio::task::JoinError>,
) where
    W: AsyncWrite + Unpin + Send,
{
    match result {
        Ok(Ok(reply_bytes)) => {
            let mut writer = writer.lock().await;
            if let Err(err) = writer.write_raw(&header, &reply_bytes).await {
                tracing::warn!(error = %err, "rpc server: write response error");
            }
        }
        Ok(Err(err)) => {
            header.error = err.to_string();
            send_invalid(writer, header).await;
        }
        Err(join_err) => {
            header.error = format!("rpc server: handler panicked: {join_err}");
            send_invalid(writer, header).await;
        }
    }
}

async fn send_invalid<W>(writer: &Arc<Mutex<CodecWriter<W>>>, header: Header)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write(&header, &INVALID_BODY).await {
        tracing::warn!(error = %err, "rpc server: write response error");
    }
}
