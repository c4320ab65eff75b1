//! Enumerate service endpoints and pick one per a selection policy.

mod multi;

pub use multi::MultiServersDiscovery;

use async_trait::async_trait;

use crate::error::Result;

/// Load-balancing policy for [`Discovery::get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    Random,
    RoundRobin,
}

/// A pluggable source of truth for "which endpoints exist right now".
///
/// An etcd-backed (or other registry-backed) implementation is a reasonable
/// extension — only this trait is normative; [`MultiServersDiscovery`] is
/// the in-memory implementation this crate ships, for callers who already
/// know their server list.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Pull a fresh server list from whatever backs this discovery source.
    /// A no-op for sourceless implementations like [`MultiServersDiscovery`].
    async fn refresh(&self) -> Result<()>;

    /// Replace the server list outright.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Pick one endpoint per `mode`. Fails if no servers are known.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// A snapshot of every known endpoint, e.g. for [`crate::xclient::XClient::broadcast`].
    async fn get_all(&self) -> Result<Vec<String>>;
}
