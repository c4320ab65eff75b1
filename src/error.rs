//! The crate's single error type.
//!
//! The error set is closed and callers frequently need to fan a single
//! failure out to many waiters (every pending [`crate::client::Call`] on a
//! dead connection, every sibling of a [`crate::xclient::XClient::broadcast`]),
//! so `Error` is cheap to clone rather than wrapping a boxed `dyn Error`.

use std::fmt;

/// Errors produced anywhere in the GeeRPC stack.
#[derive(Clone, Debug)]
pub enum Error {
    /// Transport-level read/write failure on the underlying stream.
    Io(String),
    /// Malformed wire data: bad magic number, unknown codec, truncated frame.
    Protocol(String),
    /// `Service.Method` could not be resolved to a registered handler.
    Routing(String),
    /// The resolved method ran and returned an application error.
    Invocation(String),
    /// A connect, call, or handle deadline elapsed.
    Timeout(String),
    /// The call was cancelled by the caller before a reply arrived.
    Cancelled(String),
    /// Use-after-close, duplicate registration, or another precondition violation.
    Lifecycle(String),
    /// An error string that arrived from the remote peer in a `Header`.
    Remote(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn routing(msg: impl Into<String>) -> Self {
        Error::Routing(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Error::Lifecycle(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// `true` for the two read-header outcomes the server serve loop treats
    /// as "peer hung up", rather than a protocol violation worth logging.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(msg) if msg.contains("eof") || msg.contains("EOF"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "rpc: io error: {msg}"),
            Error::Protocol(msg) => write!(f, "rpc: protocol error: {msg}"),
            Error::Routing(msg) => write!(f, "rpc server: {msg}"),
            Error::Invocation(msg) => write!(f, "{msg}"),
            Error::Timeout(msg) => write!(f, "{msg}"),
            Error::Cancelled(msg) => write!(f, "rpc client: call failed: {msg}"),
            Error::Lifecycle(msg) => write!(f, "{msg}"),
            Error::Remote(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("json: {err}"))
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Protocol(format!("bincode: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
