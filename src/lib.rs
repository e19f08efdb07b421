//! Messaging runtime for a distributed object bus.
//!
//! Remote participants expose numbered services whose methods are invoked
//! and whose signals are subscribed-to over framed TCP connections.
//! [`RemoteObject`] is the client-side proxy for one such service: it
//! serializes calls, correlates the asynchronous replies, and feeds incoming
//! events to local subscribers. [`TransportServer`] is the listening side:
//! it accepts connections, wraps each into a [`TransportSocket`], and queues
//! them for a delegate to drain.

mod macros;
pub mod message;
mod meta;
pub mod net;
mod pending;
mod proxy;
pub mod types;
mod url;

pub use message::{Message, MessageKind};
pub use meta::{MetaMethod, MetaObject, MetaObjectBuilder, MetaSignal};
pub use net::server::{ServerError, TransportServer, TransportServerDelegate};
pub use net::socket::TransportSocket;
pub use pending::{CallError, CallFuture, CallResult};
pub use proxy::{ClosePolicy, RemoteObject, SignalHandler};
pub use types::{Buffer, DecodeError, SignatureError, Type, Value};
pub use url::{Url, UrlError};

use std::sync::Arc;

/// Inbound dispatch callback registered on a socket for one service id.
/// Invoked on the socket's read task with each message addressed there.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Token identifying one dispatcher registration, used for symmetric removal.
pub type DispatchLink = u64;

/// A full-duplex framed channel multiplexing outbound sends with inbound
/// dispatch keyed by service id.
///
/// [`RemoteObject`] consumes this interface; [`TransportSocket`] is the
/// concrete TCP implementation.
pub trait MessageSocket: Send + Sync {
    /// Queues a message for delivery without blocking. Returns `false` when
    /// the connection is gone and the message cannot be queued.
    fn send(&self, msg: Message) -> bool;

    fn is_connected(&self) -> bool;

    /// Registers a dispatcher for every inbound message addressed to
    /// `service`. Safe to call from any thread.
    fn message_pending_connect(&self, service: u32, handler: MessageHandler) -> DispatchLink;

    /// Removes a registration previously returned by
    /// [`message_pending_connect`](Self::message_pending_connect).
    fn message_pending_disconnect(&self, service: u32, link: DispatchLink);
}
