//! A discovery-backed client: one logical `Call`/`Broadcast` surface fanned
//! out over whichever servers a [`Discovery`] currently reports, reusing
//! connections across calls to the same address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{x_dial, DynClient};
use crate::discovery::{Discovery, SelectMode};
use crate::error::{Error, Result};
use crate::option::Options;

/// A connection cache in front of a [`Discovery`]. `D` is generic rather
/// than `Box<dyn Discovery>` so that a concrete, non-object-safe discovery
/// implementation can be used directly; erase it yourself with a `Box<dyn
/// Discovery>` receiver type if you need several backends behind one type.
pub struct XClient<D> {
    discovery: D,
    mode: SelectMode,
    opt: Options,
    clients: Mutex<HashMap<String, Arc<DynClient>>>,
    closed: AtomicBool,
}

impl<D> XClient<D>
where
    D: Discovery,
{
    pub fn new(discovery: D, mode: SelectMode, opt: Options) -> Self {
        XClient {
            discovery,
            mode,
            opt,
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Close every cached connection and mark this `XClient` closed: every
    /// call/broadcast issued afterward fails immediately rather than
    /// redialing, matching a closed [`crate::client::Client`]'s
    /// use-after-close behavior.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
        Ok(())
    }

    /// Reuse a cached connection to `rpc_addr` if it is still healthy,
    /// otherwise dial a fresh one and cache it. Fails without dialing once
    /// this `XClient` has been closed.
    async fn dial(&self, rpc_addr: &str) -> Result<Arc<DynClient>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("xclient is shut down"));
        }
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(Arc::clone(client));
            }
            clients.remove(rpc_addr);
        }
        let client = x_dial(rpc_addr, self.opt.clone()).await?;
        let client = Arc::new(client);
        clients.insert(rpc_addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Resolve one endpoint via the configured [`SelectMode`] and issue a
    /// single call against it.
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
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&rpc_addr).await?;
        client.call(service_method, args, cancel).await
    }

    /// Issue the same call against every endpoint [`Discovery::get_all`]
    /// reports, concurrently.
    ///
    /// The first failure cancels the remaining in-flight calls (best-effort
    /// — a call already past its cancellation check keeps running on the
    /// server, same as a single [`crate::client::Client::call`]) and is
    /// recorded; the first success is recorded separately. Once every call
    /// has finished, a recorded failure wins regardless of whether other
    /// siblings went on to succeed — only when nothing failed is the first
    /// successful reply returned.
    pub async fn broadcast<Arg, Reply>(&self, service_method: impl Into<String>, args: Arg) -> Result<Reply>
    where
        Arg: Serialize + Clone + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let service_method = service_method.into();
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(Error::lifecycle("rpc discovery: no available servers"));
        }

        let cancel = CancellationToken::new();
        let first_error: StdMutex<Option<Error>> = StdMutex::new(None);
        let first_reply: StdMutex<Option<Reply>> = StdMutex::new(None);

        let calls = servers.iter().map(|addr| {
            let service_method = service_method.clone();
            let args = args.clone();
            let cancel = cancel.clone();
            let first_error = &first_error;
            let first_reply = &first_reply;
            async move {
                let result = async {
                    let client = self.dial(addr.as_str()).await?;
                    client.call::<Arg, Reply>(service_method, args, &cancel).await
                }
                .await;
                match result {
                    Ok(reply) => {
                        let mut slot = first_reply.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(reply);
                        }
                    }
                    Err(err) => {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(err);
                            cancel.cancel();
                        }
                    }
                }
            }
        });

        join_all(calls).await;

        if let Some(err) = first_error.into_inner().unwrap() {
            return Err(err);
        }
        first_reply
            .into_inner()
            .unwrap()
            .ok_or_else(|| Error::lifecycle("rpc discovery: no available servers"))
    }
}
