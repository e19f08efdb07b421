use log::error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::Value;

/// How a remote call can fail, as observed through its [`CallFuture`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The peer answered with an error message, or the call could not be
    /// handed to the transport. The text is the peer's error string or a
    /// description of the local failure.
    #[error("{0}")]
    Failure(String),

    /// The proxy was closed while the call was in flight, under a policy
    /// that cancels outstanding calls.
    #[error("call canceled: remote object closed")]
    Canceled,

    /// The completion slot was dropped without ever being resolved.
    #[error("call abandoned without a reply")]
    Abandoned,
}

pub type CallResult = Result<Value, CallError>;

/// Resolving half of a one-shot completion slot. Owned by the pending-call
/// registry until a reply, error, or send failure claims it.
pub(crate) struct CallPromise(oneshot::Sender<CallResult>);

impl CallPromise {
    pub(crate) fn set_value(self, value: Value) {
        let _ = self.0.send(Ok(value));
    }

    pub(crate) fn set_error(self, text: impl Into<String>) {
        let _ = self.0.send(Err(CallError::Failure(text.into())));
    }

    pub(crate) fn cancel(self) {
        let _ = self.0.send(Err(CallError::Canceled));
    }
}

/// Waiting half of a completion slot, returned by
/// [`RemoteObject::call`](crate::RemoteObject::call).
pub struct CallFuture(oneshot::Receiver<CallResult>);

impl Future for CallFuture {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CallResult> {
        Pin::new(&mut self.0).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(CallError::Abandoned),
        })
    }
}

/// Builds a fresh slot.
pub(crate) fn call_slot() -> (CallPromise, CallFuture) {
    let (tx, rx) = oneshot::channel();
    (CallPromise(tx), CallFuture(rx))
}

/// Registry of calls awaiting an answer, keyed by request id.
///
/// Shared between the issuing path (any caller thread) and the dispatch path
/// (the socket's read task); both serialize through the same mutex. Slots
/// are only ever resolved after leaving the lock.
#[derive(Default)]
pub(crate) struct PendingCalls {
    slots: Mutex<HashMap<u32, CallPromise>>,
}

impl PendingCalls {
    /// Registers a slot for `id`. A duplicate id means the id generator is
    /// broken; the stale slot is displaced (its future reports abandonment)
    /// and the condition is logged loudly.
    pub(crate) fn insert(&self, id: u32, promise: CallPromise) {
        if self.slots.lock().insert(id, promise).is_some() {
            error!("pending call {id} already registered, displacing the old slot");
        }
    }

    /// Atomic find-and-remove.
    pub(crate) fn take(&self, id: u32) -> Option<CallPromise> {
        self.slots.lock().remove(&id)
    }

    /// Empties the registry, yielding every outstanding slot.
    pub(crate) fn drain(&self) -> Vec<CallPromise> {
        self.slots.lock().drain().map(|(_, slot)| slot).collect()
    }
}
