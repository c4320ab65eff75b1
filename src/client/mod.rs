//! Multiplex concurrent calls over one connection; correlate responses;
//! connect timeouts; HTTP CONNECT tunneling; `protocol@addr` dialing.

mod call;

pub use call::Call;
use call::{CallCompletion, TypedCompletion};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::codec::{Codec, CodecKind, CodecReader, CodecWriter};
use crate::error::{Error, Result};
use crate::option::{write_options, Header, Options};
use crate::server::{CONNECTED_STATUS, RPC_PATH};

/// Any boxable bidirectional stream, used to give [`dial`], [`dial_http`],
/// and [`x_dial`] a single concrete return type no matter which transport
/// path they took — the same "erase the transport, keep one `Client` type"
/// move tonic's own boxed connection types make.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// A [`Client`] returned by [`dial`]/[`dial_http`]/[`x_dial`].
pub type DynClient = Client<WriteHalf<BoxedStream>>;

struct ClientState {
    next_seq: u64,
    pending: HashMap<u64, Box<dyn CallCompletion>>,
    closing: bool,
    shutdown: bool,
}

/// One multiplexed RPC connection.
///
/// Owns the write half of a negotiated [`Codec`] and a background task
/// draining the read half forever. `W` is the concrete write-half type;
/// most callers want [`DynClient`] rather than naming it.
pub struct Client<W> {
    writer: Mutex<CodecWriter<W>>,
    state: Arc<StdMutex<ClientState>>,
    receiver: tokio::task::JoinHandle<()>,
}

impl<W> Drop for Client<W> {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

impl<W> std::fmt::Debug for Client<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl<W> Client<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// `false` once the client has been closed or a connection fault has
    /// been observed.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// User-initiated shutdown: stop accepting new calls, fail every
    /// still-pending call immediately, and close the codec.
    ///
    /// A half-close of the write side alone doesn't guarantee a blocked
    /// local read observes EOF promptly — that depends on the remote peer
    /// noticing and closing its side in turn. So rather than relying on the
    /// receive loop to eventually fail pending calls once that happens,
    /// `close` aborts the receive loop itself and drains `pending` directly,
    /// the same way [`Drop`] does, giving an immediate, same-process
    /// guarantee that every pending call is signalled before `close` returns.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closing {
                return Err(Error::lifecycle("connection is shut down"));
            }
            state.closing = true;
        }
        self.receiver.abort();
        terminate_calls(&self.state, Error::lifecycle("connection is shut down")).await;
        let mut writer = self.writer.lock().await;
        writer.close().await
    }

    /// Asynchronously issue a call. Registers a [`Call`] under a fresh
    /// `seq`, writes the header and argument, and returns the assigned
    /// `seq`; the result arrives later on `done`.
    ///
    /// `done` must have nonzero capacity — `tokio::sync::mpsc::channel`
    /// already panics at construction for a zero-capacity request, so an
    /// unbuffered done channel is rejected up front rather than deadlocking
    /// later.
    pub async fn go<Arg, Reply>(
        &self,
        service_method: impl Into<String>,
        args: Arg,
        done: mpsc::Sender<Call<Reply>>,
    ) -> Result<u64>
    where
        Arg: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let service_method = service_method.into();
        let mut writer = self.writer.lock().await;

        let seq = {
            let mut state = self.state.lock().unwrap();
            if state.closing || state.shutdown {
                return Err(Error::lifecycle("connection is shut down"));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                seq,
                Box::new(TypedCompletion {
                    seq,
                    service_method: service_method.clone(),
                    done,
                }),
            );
            seq
        };

        let header = Header {
            service_method: service_method.clone(),
            seq,
            error: String::new(),
        };

        if let Err(err) = writer.write(&header, &args).await {
            drop(writer);
            let completion = {
                let mut state = self.state.lock().unwrap();
                state.pending.remove(&seq)
            };
            if let Some(completion) = completion {
                completion.complete_err(err.clone()).await;
            }
            return Err(err);
        }

        Ok(seq)
    }

    /// Issue a call and wait for its reply, or for `cancel` to fire first.
    ///
    /// On cancellation the pending entry is removed (best-effort — the
    /// receive loop may have already claimed it) and a
    /// [`Error::Cancelled`] is returned; the method keeps executing on the
    /// server, whose eventual reply is simply discarded by the receive
    /// loop once it arrives with no matching pending entry.
    pub async fn call<Arg, Reply>(
        &self,
        service_method: impl Into<String>,
        args: Arg,
        cancel: &CancellationToken,
    ) -> Result<Reply>
    where
        Arg: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let (done, mut rx) = mpsc::channel(1);
        let seq = self.go(service_method, args, done).await?;

        tokio::select! {
            _ = cancel.cancelled() => {
                let mut state = self.state.lock().unwrap();
                state.pending.remove(&seq);
                Err(Error::Cancelled("context cancelled".to_string()))
            }
            received = rx.recv() => {
                match received {
                    Some(call) => call.result,
                    None => Err(Error::lifecycle("connection is shut down")),
                }
            }
        }
    }

    /// [`Client::call`] with no cancellation source — equivalent to passing
    /// a context that is never cancelled.
    pub async fn call_uncancellable<Arg, Reply>(&self, service_method: impl Into<String>, args: Arg) -> Result<Reply>
    where
        Arg: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        self.call(service_method, args, &CancellationToken::new()).await
    }
}

async fn receive_loop<R>(mut reader: CodecReader<R>, state: Arc<StdMutex<ClientState>>)
where
    R: AsyncRead + Unpin + Send,
{
    let terminal_err = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(err) => break err,
        };

        let completion = {
            let mut state = state.lock().unwrap();
            state.pending.remove(&header.seq)
        };

        match completion {
            // A response to a write that previously failed and was already
            // removed/signalled; drain its body and move on.
            None => {
                if let Err(err) = reader.discard_body().await {
                    break err;
                }
            }
            Some(completion) if !header.error.is_empty() => {
                let discard_result = reader.discard_body().await;
                completion.complete_err(Error::Remote(header.error)).await;
                if let Err(err) = discard_result {
                    break err;
                }
            }
            Some(completion) => match reader.read_raw_body().await {
                Ok(body_bytes) => completion.complete_ok(reader.kind(), &body_bytes).await,
                Err(err) => {
                    completion.complete_err(err.clone()).await;
                    break err;
                }
            },
        }
    };

    terminate_calls(&state, terminal_err).await;
}

/// Fail every still-pending call with the receive loop's terminal error.
///
/// The registration check in [`Client::go`] and this drain both run under
/// the same `state` lock, with no intervening await, so a call either lands
/// in `pending` before this drain (and gets terminated here) or sees
/// `shutdown == true` and is rejected before it is ever inserted — there is
/// no window in which a call is silently lost, without needing a second
/// lock to serialize registration against shutdown.
async fn terminate_calls(state: &Arc<StdMutex<ClientState>>, err: Error) {
    let pending = {
        let mut state = state.lock().unwrap();
        state.shutdown = true;
        std::mem::take(&mut state.pending)
    };
    for (_, completion) in pending {
        completion.complete_err(err.clone()).await;
    }
}

/// Negotiate a connection that has already been established: look up the
/// codec, send the JSON `Options` preamble, then spawn the receive loop.
/// `seq` starts at 1 (0 is reserved as "invalid").
pub async fn new_client<S>(mut stream: S, opt: Options) -> Result<Client<WriteHalf<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec_kind = CodecKind::by_name(&opt.codec_type)?;
    write_options(&mut stream, &opt).await?;

    let codec = Codec::new(stream, codec_kind);
    let (reader, writer) = codec.split();

    let state = Arc::new(StdMutex::new(ClientState {
        next_seq: 1,
        pending: HashMap::new(),
        closing: false,
        shutdown: false,
    }));

    let receiver = tokio::spawn(receive_loop(reader, Arc::clone(&state)));

    Ok(Client {
        writer: Mutex::new(writer),
        state,
        receiver,
    })
}

/// Race a connect+handshake future against `connect_timeout`; a timeout
/// drops (and so closes) whatever connection the future had reached.
/// `connect_timeout == Duration::ZERO` waits indefinitely.
async fn dial_timeout<F, T>(connect_timeout: Duration, handshake: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if connect_timeout.is_zero() {
        return handshake.await;
    }
    match tokio::time::timeout(connect_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "rpc client: connect timeout: expect within {connect_timeout:?}"
        ))),
    }
}

/// Dial `addr` over TCP and perform the RPC handshake.
pub async fn dial(addr: &str, opt: Options) -> Result<DynClient> {
    let connect_timeout = opt.connect_timeout;
    dial_timeout(connect_timeout, async {
        let stream = TcpStream::connect(addr).await?;
        let boxed: BoxedStream = Box::new(stream);
        new_client(boxed, opt).await
    })
    .await
}

/// Dial `addr` over TCP, tunnel through an HTTP `CONNECT` to [`RPC_PATH`],
/// then perform the RPC handshake over the upgraded connection.
pub async fn dial_http(addr: &str, opt: Options) -> Result<DynClient> {
    let connect_timeout = opt.connect_timeout;
    dial_timeout(connect_timeout, async {
        let stream = TcpStream::connect(addr).await?;
        connect_http(stream, opt).await
    })
    .await
}

async fn connect_http<S>(mut stream: S, opt: Options) -> Result<DynClient>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    stream
        .write_all(format!("CONNECT {RPC_PATH} HTTP/1.0\n\n").as_bytes())
        .await?;

    let mut reader = BufReader::new(stream);
    let status = read_status_line(&mut reader).await?;
    if status != CONNECTED_STATUS {
        return Err(Error::protocol(format!("unexpected HTTP response: {status}")));
    }

    let boxed: BoxedStream = Box::new(reader);
    new_client(boxed, opt).await
}

async fn read_status_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::protocol("connection closed before a status line"));
    }
    loop {
        let mut next = String::new();
        if reader.read_line(&mut next).await? == 0 || next.trim().is_empty() {
            break;
        }
    }
    Ok(line.trim_end().splitn(2, ' ').nth(1).unwrap_or_default().to_string())
}

/// Dial `"protocol@addr"`: `http` tunnels through [`dial_http`]; any other
/// protocol dials that transport directly (only `tcp` is implemented here;
/// `unix` is a straightforward extension left to a concrete deployment).
pub async fn x_dial(rpc_addr: &str, opt: Options) -> Result<DynClient> {
    let mut parts = rpc_addr.splitn(3, '@');
    let protocol = parts.next().unwrap_or_default();
    let addr = parts.next();
    if addr.is_none() || parts.next().is_some() {
        return Err(Error::protocol(format!(
            "rpc client err: wrong format '{rpc_addr}', expect protocol@addr"
        )));
    }
    let addr = addr.unwrap();

    match protocol {
        "http" => dial_http(addr, opt).await,
        _ => dial(addr, opt).await,
    }
}
