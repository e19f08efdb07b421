use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::message::{
    FN_REGISTER_EVENT, FN_UNREGISTER_EVENT, Message, MessageKind, SERVICE_SERVER,
};
use crate::meta::MetaObject;
use crate::pending::{call_slot, CallFuture, PendingCalls};
use crate::types::{Buffer, Type, Value};
use crate::{DispatchLink, MessageHandler, MessageSocket};

/// Callback invoked with the deserialized parameters each time the remote
/// service emits a subscribed signal. Runs on the socket's read task.
pub type SignalHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// What happens to calls still awaiting a reply when the proxy closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Leave outstanding futures unresolved; callers holding them keep
    /// waiting. This matches the historical behavior of the protocol's
    /// reference stack.
    #[default]
    LeaveOutstanding,

    /// Fail outstanding futures with [`CallError::Canceled`](crate::CallError::Canceled).
    CancelOutstanding,
}

/// Client-side stand-in for a service hosted on a peer.
///
/// A proxy is bound to one `(service, meta, socket)` triple. Constructing it
/// registers a dispatcher on the socket for the service id, so replies,
/// errors, and events addressed to the service reach this proxy; closing (or
/// dropping) the proxy detaches that dispatcher again.
pub struct RemoteObject {
    inner: Arc<Inner>,
}

struct Inner {
    service: u32,
    meta: MetaObject,
    close_policy: ClosePolicy,
    pending: PendingCalls,
    attachment: Mutex<Attachment>,
    signals: Mutex<SignalTable>,
}

#[derive(Default)]
struct Attachment {
    socket: Option<Arc<dyn MessageSocket>>,
    dispatcher: Option<DispatchLink>,
}

#[derive(Default)]
struct SignalTable {
    next_index: u32,
    subscribers: HashMap<u32, Vec<(u32, SignalHandler)>>,
}

impl RemoteObject {
    pub fn new(service: u32, meta: MetaObject, socket: Arc<dyn MessageSocket>) -> RemoteObject {
        RemoteObject::with_close_policy(service, meta, socket, ClosePolicy::default())
    }

    pub fn with_close_policy(
        service: u32,
        meta: MetaObject,
        socket: Arc<dyn MessageSocket>,
        close_policy: ClosePolicy,
    ) -> RemoteObject {
        let proxy = RemoteObject {
            inner: Arc::new(Inner {
                service,
                meta,
                close_policy,
                pending: PendingCalls::default(),
                attachment: Mutex::new(Attachment::default()),
                signals: Mutex::new(SignalTable::default()),
            }),
        };
        proxy.set_socket(Some(socket));
        proxy
    }

    pub fn service(&self) -> u32 {
        self.inner.service
    }

    pub fn meta(&self) -> &MetaObject {
        &self.inner.meta
    }

    /// Attaches the proxy to a socket, detaching the previous dispatcher
    /// registration first. `None` detaches only.
    pub fn set_socket(&self, socket: Option<Arc<dyn MessageSocket>>) {
        let mut attachment = self.inner.attachment.lock();
        let link = attachment.dispatcher.take();
        if let (Some(old), Some(link)) = (attachment.socket.as_ref(), link) {
            old.message_pending_disconnect(self.inner.service, link);
        }
        attachment.socket = socket;
        if let Some(socket) = attachment.socket.as_ref() {
            let inner = Arc::downgrade(&self.inner);
            let handler: MessageHandler = Arc::new(move |msg| {
                if let Some(inner) = Weak::upgrade(&inner) {
                    inner.on_message(msg);
                }
            });
            attachment.dispatcher =
                Some(socket.message_pending_connect(self.inner.service, handler));
        }
    }

    /// Invokes `method` on the remote service. The returned future resolves
    /// when the peer answers with a reply or an error, or immediately when
    /// the message cannot be sent.
    pub fn call(&self, method: u32, args: &[Value]) -> CallFuture {
        let msg = Message::call(self.inner.service, method, Buffer::of(args));
        let id = msg.id();

        #[cfg(debug_assertions)]
        self.inner.check_call_signature(method, msg.payload());

        let (promise, future) = call_slot();
        // The slot must exist before the message is on the wire, so a reply
        // racing the send still finds it.
        self.inner.pending.insert(id, promise);

        let socket = self.inner.attachment.lock().socket.clone();
        let delivered = match socket {
            Some(socket) if socket.is_connected() => socket.send(msg),
            _ => false,
        };
        if !delivered {
            error!(
                "transport failure sending call {id} to service {}",
                self.inner.service
            );
            // take-and-resolve: if the dispatch path won a race for this id,
            // the slot is gone and the call already completed.
            if let Some(slot) = self.inner.pending.take(id) {
                slot.set_error(match self.inner.meta.method(method) {
                    Some(m) => format!(
                        "network error while sending call to '{}{}'",
                        m.name(),
                        m.signature()
                    ),
                    None => format!("network error while sending call to unknown method (id={method})"),
                });
            }
        }
        future
    }

    /// Subscribes `handler` to a remote signal, returning the opaque link id
    /// (`event << 16 | index`). One register message is sent per local
    /// subscriber; the remote end does its own refcounting.
    pub fn connect(&self, event: u32, handler: SignalHandler) -> u32 {
        let link = {
            let mut signals = self.inner.signals.lock();
            let index = signals.next_index & 0xFFFF;
            signals.next_index += 1;
            let link = (event << 16) | index;
            signals
                .subscribers
                .entry(event)
                .or_default()
                .push((link, handler));
            link
        };

        let payload = Buffer::of(&[
            Value::UInt(self.inner.service),
            Value::UInt(event),
            Value::UInt(link),
        ]);
        let msg = Message::event(SERVICE_SERVER, FN_REGISTER_EVENT, payload);
        if !self.inner.send_control(msg) {
            error!("transport failure registering event {event}");
        }
        debug!("connect to event {event} gave link {link:#x}");
        link
    }

    /// Removes the local subscriber behind `link` and tells the remote end.
    /// Returns `false` when the link is unknown, in which case nothing is
    /// sent. A send failure is logged but local removal stands.
    pub fn disconnect(&self, link: u32) -> bool {
        let event = link >> 16;
        let removed = {
            let mut signals = self.inner.signals.lock();
            match signals.subscribers.get_mut(&event) {
                Some(subscribers) => {
                    let before = subscribers.len();
                    subscribers.retain(|(registered, _)| *registered != link);
                    subscribers.len() != before
                }
                None => false,
            }
        };
        if !removed {
            warn!("disconnection failure for link {link:#x}");
            return false;
        }

        let payload = Buffer::of(&[
            Value::UInt(self.inner.service),
            Value::UInt(event),
            Value::UInt(link),
        ]);
        let msg = Message::event(SERVICE_SERVER, FN_UNREGISTER_EVENT, payload);
        if !self.inner.send_control(msg) {
            error!("transport failure unregistering event {event}");
        }
        true
    }

    /// Emits an event toward the remote service, fire-and-forget.
    // TODO: also trigger local subscribers immediately instead of waiting
    // for the server to bounce the event back.
    pub fn emit(&self, event: u32, args: &[Value]) {
        let msg = Message::event(self.inner.service, event, Buffer::of(args));
        if !self.inner.send_control(msg) {
            error!("transport failure emitting event {event}");
        }
    }

    /// Detaches the dispatcher registration from the socket. Idempotent;
    /// also run on drop. Under [`ClosePolicy::CancelOutstanding`], every
    /// in-flight call fails with a cancellation error.
    pub fn close(&self) {
        {
            let mut attachment = self.inner.attachment.lock();
            let link = attachment.dispatcher.take();
            if let (Some(socket), Some(link)) = (attachment.socket.as_ref(), link) {
                socket.message_pending_disconnect(self.inner.service, link);
            }
        }
        if self.inner.close_policy == ClosePolicy::CancelOutstanding {
            for slot in self.inner.pending.drain() {
                slot.cancel();
            }
        }
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn send_control(&self, msg: Message) -> bool {
        let socket = self.attachment.lock().socket.clone();
        match socket {
            Some(socket) => socket.send(msg),
            None => false,
        }
    }

    #[cfg(debug_assertions)]
    fn check_call_signature(&self, method: u32, payload: &Buffer) {
        if let Some(m) = self.meta.method(method) {
            if m.parameters_signature() != payload.signature() {
                error!(
                    "call signature mismatch on method '{}': declared \"{}\", sending \"{}\"",
                    m.name(),
                    m.parameters_signature(),
                    payload.signature()
                );
            }
        }
    }

    /// Inbound dispatcher, invoked by the socket with every message
    /// addressed to this proxy's service.
    fn on_message(&self, msg: &Message) {
        debug!(
            "service {} got {:?} message {} (function {})",
            self.service,
            msg.kind(),
            msg.id(),
            msg.function()
        );
        let slot = self.pending.take(msg.id());
        match msg.kind() {
            MessageKind::Reply => {
                let Some(slot) = slot else {
                    error!(
                        "no pending call for reply {} (service {}, function {})",
                        msg.id(),
                        msg.service(),
                        msg.function()
                    );
                    return;
                };
                let Some(method) = self.meta.method(msg.function()) else {
                    error!("reply for unknown method {}", msg.function());
                    slot.set_error(format!("reply for unknown method (id={})", msg.function()));
                    return;
                };
                let ty = match Type::from_signature(method.return_signature()) {
                    Ok(ty) => ty,
                    Err(_) => {
                        slot.set_error(format!(
                            "no type for return signature \"{}\"",
                            method.return_signature()
                        ));
                        return;
                    }
                };
                match ty.read(&mut msg.payload().reader()) {
                    Ok(value) => slot.set_value(value),
                    Err(e) => slot.set_error(format!("malformed reply payload: {e}")),
                }
            }
            MessageKind::Error => {
                let Some(slot) = slot else {
                    error!(
                        "no pending call for error {} (service {}, function {})",
                        msg.id(),
                        msg.service(),
                        msg.function()
                    );
                    return;
                };
                if msg.payload().signature() != "s" {
                    error!(
                        "invalid error signature \"{}\"",
                        msg.payload().signature()
                    );
                    slot.set_error("unknown error");
                    return;
                }
                match Type::Str.read(&mut msg.payload().reader()) {
                    Ok(Value::Str(text)) => {
                        debug!("received error message for call {}: {text}", msg.id());
                        slot.set_error(text);
                    }
                    _ => slot.set_error("unknown error"),
                }
            }
            MessageKind::Event => self.on_event(msg),
            MessageKind::Call => {
                error!(
                    "unexpected call message {} on remote object proxy (service {}, function {})",
                    msg.id(),
                    msg.service(),
                    msg.function()
                );
            }
        }
    }

    fn on_event(&self, msg: &Message) {
        let event = msg.event_id();
        let Some(signal) = self.meta.signal(event) else {
            warn!("event message on unknown signal {event}");
            return;
        };

        let parameter_types = match Type::tuple_from_signature(signal.parameters_signature()) {
            Ok(types) => types,
            Err(e) => {
                warn!(
                    "bad signature \"{}\" on signal {event}: {e}",
                    signal.signature()
                );
                return;
            }
        };
        let mut reader = msg.payload().reader();
        let mut parameters = Vec::with_capacity(parameter_types.len());
        for ty in &parameter_types {
            match ty.read(&mut reader) {
                Ok(value) => parameters.push(value),
                Err(e) => {
                    warn!("deserialize error on event {event}: {e}");
                    return;
                }
            }
        }

        let handlers: Vec<SignalHandler> = self
            .signals
            .lock()
            .subscribers
            .get(&event)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|(_, handler)| handler.clone())
                    .collect()
            })
            .unwrap_or_default();
        for handler in &handlers {
            handler(&parameters);
        }
    }
}
