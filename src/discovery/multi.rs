//! An in-memory [`Discovery`] for callers who already know their server list.

use rand::Rng;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::{Discovery, SelectMode};

struct State {
    servers: Vec<String>,
    index: usize,
}

/// Round-robins or randomly picks among a fixed, explicitly-updated list of
/// `host:port` endpoints. Carries no registry client of its own; `update`
/// is the only way its list ever changes, and `refresh` is a deliberate
/// no-op since there is nowhere for it to pull a fresh list from.
pub struct MultiServersDiscovery {
    state: RwLock<State>,
}

impl MultiServersDiscovery {
    /// The round-robin cursor starts at a random offset so that many
    /// `MultiServersDiscovery` instances created at the same moment (e.g.
    /// several clients started together) don't all hit server zero first.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..i32::MAX as usize);
        MultiServersDiscovery {
            state: RwLock::new(State { servers, index }),
        }
    }
}

#[async_trait::async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        let mut state = self.state.write().await;
        state.servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.write().await;
        let n = state.servers.len();
        if n == 0 {
            return Err(Error::lifecycle("rpc discovery: no available servers"));
        }
        match mode {
            SelectMode::Random => {
                let i = rand::thread_rng().gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let i = state.index % n;
                state.index = state.index.wrapping_add(1);
                Ok(state.servers[i].clone())
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_cycles_every_server_before_repeating() {
        let d = MultiServersDiscovery::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(d.get(SelectMode::RoundRobin).await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn empty_list_is_an_error() {
        let d = MultiServersDiscovery::new(vec![]);
        assert!(d.get(SelectMode::Random).await.is_err());
        assert!(d.get(SelectMode::RoundRobin).await.is_err());
    }

    #[tokio::test]
    async fn update_replaces_the_list() {
        let d = MultiServersDiscovery::new(vec!["a".into()]);
        d.update(vec!["x".into(), "y".into()]).await.unwrap();
        let all = d.get_all().await.unwrap();
        assert_eq!(all, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn refresh_is_a_no_op() {
        let d = MultiServersDiscovery::new(vec!["a".into()]);
        d.refresh().await.unwrap();
        assert_eq!(d.get_all().await.unwrap(), vec!["a".to_string()]);
    }
}
