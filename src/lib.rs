//! GeeRPC: a bidirectional, multiplexed RPC runtime with pluggable wire
//! codecs, typed method dispatch, and a discovery-backed load-balancing
//! client.
//!
//! Start with [`service::ServiceBuilder`] and [`server::Server`] to expose
//! methods, and [`client::dial`]/[`client::Client::call`] or
//! [`xclient::XClient`] to invoke them.

pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod option;
pub mod server;
pub mod service;
pub mod xclient;

pub use error::{Error, Result};
