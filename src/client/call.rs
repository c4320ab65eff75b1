//! The client-side correlator record and its type-erased completion.
//!
//! The pending table holds calls for many different reply types at once, but
//! Rust has no `interface{}` to stash a reply into by reflection. Each call
//! instead gets a small monomorphized [`TypedCompletion`] that already knows
//! its own `Reply` type; the pending table stores these behind one
//! object-safe [`CallCompletion`] trait object, so decoding never needs a
//! runtime type check or downcast.

use tokio::sync::mpsc;

use crate::codec::CodecKind;
use crate::error::{Error, Result};

/// The outcome of one completed call, delivered on the channel the caller
/// passed to [`super::Client::go`].
#[derive(Debug)]
pub struct Call<Reply> {
    pub seq: u64,
    pub service_method: String,
    pub result: Result<Reply>,
}

#[async_trait::async_trait]
pub(super) trait CallCompletion: Send {
    async fn complete_ok(self: Box<Self>, codec: CodecKind, body_bytes: &[u8]);
    async fn complete_err(self: Box<Self>, err: Error);
}

pub(super) struct TypedCompletion<Reply> {
    pub seq: u64,
    pub service_method: String,
    pub done: mpsc::Sender<Call<Reply>>,
}

#[async_trait::async_trait]
impl<Reply> CallCompletion for TypedCompletion<Reply>
where
    Reply: serde::de::DeserializeOwned + Send + 'static,
{
    async fn complete_ok(self: Box<Self>, codec: CodecKind, body_bytes: &[u8]) {
        let result = codec
            .decode::<Reply>(body_bytes)
            .map_err(|err| Error::Protocol(format!("reading body: {err}")));
        let _ = self
            .done
            .send(Call {
                seq: self.seq,
                service_method: self.service_method,
                result,
            })
            .await;
    }

    async fn complete_err(self: Box<Self>, err: Error) {
        let _ = self
            .done
            .send(Call {
                seq: self.seq,
                service_method: self.service_method,
                result: Err(err),
            })
            .await;
    }
}
