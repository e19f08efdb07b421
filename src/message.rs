use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::Buffer;

/// Reserved service id carrying the signal-management control sub-protocol.
/// Every other service id addresses a user service.
pub const SERVICE_SERVER: u32 = 0;

/// The single object addressed on every service in this runtime.
pub const OBJECT_MAIN: u32 = 0;

/// Control function on [`SERVICE_SERVER`]: subscribe a link to a remote
/// signal. Payload is the `(service, event, link)` triple as three `I`s.
pub const FN_REGISTER_EVENT: u32 = 0;

/// Control function on [`SERVICE_SERVER`]: drop a link's subscription.
/// Same payload shape as [`FN_REGISTER_EVENT`].
pub const FN_UNREGISTER_EVENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Call,
    Reply,
    Error,
    Event,
}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn fresh_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Envelope exchanged on a transport socket.
///
/// `Call` and `Event` messages draw a unique id at construction; `Reply` and
/// `Error` messages echo the id of the call they answer, which is how the
/// caller's pending-call registry correlates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: u32,
    kind: MessageKind,
    service: u32,
    object: u32,
    function: u32,
    payload: Buffer,
}

impl Message {
    pub fn call(service: u32, function: u32, payload: Buffer) -> Message {
        Message {
            id: fresh_id(),
            kind: MessageKind::Call,
            service,
            object: OBJECT_MAIN,
            function,
            payload,
        }
    }

    pub fn event(service: u32, function: u32, payload: Buffer) -> Message {
        Message {
            id: fresh_id(),
            kind: MessageKind::Event,
            service,
            object: OBJECT_MAIN,
            function,
            payload,
        }
    }

    /// Builds the successful answer to `call`, echoing its address and id.
    pub fn reply_to(call: &Message, payload: Buffer) -> Message {
        Message {
            id: call.id,
            kind: MessageKind::Reply,
            service: call.service,
            object: call.object,
            function: call.function,
            payload,
        }
    }

    /// Builds the failure answer to `call`. A well-formed error payload is a
    /// single string (signature `s`); anything else reads back as an unknown
    /// error on the caller side.
    pub fn error_to(call: &Message, payload: Buffer) -> Message {
        Message {
            id: call.id,
            kind: MessageKind::Error,
            service: call.service,
            object: call.object,
            function: call.function,
            payload,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn service(&self) -> u32 {
        self.service
    }

    pub fn object(&self) -> u32 {
        self.object
    }

    pub fn function(&self) -> u32 {
        self.function
    }

    /// Alias of [`function`](Self::function) for event messages, where the
    /// function field selects the emitted signal.
    pub fn event_id(&self) -> u32 {
        self.function
    }

    pub fn payload(&self) -> &Buffer {
        &self.payload
    }
}
