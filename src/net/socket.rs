use async_bincode::tokio::{AsyncBincodeReader, AsyncBincodeWriter};
use futures::{SinkExt, StreamExt};
use log::{debug, error};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::url::Url;
use crate::{DispatchLink, MessageHandler, MessageSocket};

/// A framed TCP connection carrying [`Message`]s in both directions.
///
/// Outbound messages are queued onto an unbounded channel and drained by a
/// writer task; a reader task decodes inbound messages and hands each to the
/// dispatchers registered for its service id, in registration order. Both
/// tasks mark the socket disconnected when their end of the stream fails.
pub struct TransportSocket {
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    dispatch: Arc<DispatchTable>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl TransportSocket {
    /// Opens a client connection. Must run inside a tokio runtime, which the
    /// socket's reader and writer tasks are spawned onto.
    pub async fn connect(url: &Url) -> io::Result<Arc<TransportSocket>> {
        let stream = TcpStream::connect((url.host(), url.port())).await?;
        TransportSocket::from_stream(stream)
    }

    /// Wraps an already-established stream, as the transport server does for
    /// each accepted connection.
    pub(crate) fn from_stream(stream: TcpStream) -> io::Result<Arc<TransportSocket>> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let dispatch = Arc::new(DispatchTable::default());

        tokio::spawn(write_loop(write, outbound_rx, connected.clone()));
        tokio::spawn(read_loop(read, dispatch.clone(), connected.clone()));

        Ok(Arc::new(TransportSocket {
            outbound,
            connected,
            dispatch,
            local,
            peer,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl MessageSocket for TransportSocket {
    fn send(&self, msg: Message) -> bool {
        self.connected.load(Ordering::SeqCst) && self.outbound.send(msg).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn message_pending_connect(&self, service: u32, handler: MessageHandler) -> DispatchLink {
        self.dispatch.connect(service, handler)
    }

    fn message_pending_disconnect(&self, service: u32, link: DispatchLink) {
        self.dispatch.disconnect(service, link);
    }
}

/// Per-service dispatcher registrations, shared with the reader task.
#[derive(Default)]
struct DispatchTable {
    next_link: AtomicU64,
    handlers: Mutex<HashMap<u32, Vec<(DispatchLink, MessageHandler)>>>,
}

impl DispatchTable {
    fn connect(&self, service: u32, handler: MessageHandler) -> DispatchLink {
        let link = self.next_link.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .entry(service)
            .or_default()
            .push((link, handler));
        link
    }

    fn disconnect(&self, service: u32, link: DispatchLink) {
        if let Some(registered) = self.handlers.lock().get_mut(&service) {
            registered.retain(|(registered_link, _)| *registered_link != link);
        }
    }

    fn dispatch(&self, msg: &Message) {
        // Handlers are cloned out so user callbacks never run under the lock.
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .get(&msg.service())
            .map(|registered| registered.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(
                "no dispatcher for service {}, dropping message {}",
                msg.service(),
                msg.id()
            );
            return;
        }
        for handler in &handlers {
            handler(msg);
        }
    }
}

async fn write_loop(
    write: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
) {
    let mut sink = AsyncBincodeWriter::<_, Message, _>::from(write).for_async();
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = sink.send(msg).await {
            error!("transport write failed: {e}");
            break;
        }
    }
    connected.store(false, Ordering::SeqCst);
}

async fn read_loop(read: OwnedReadHalf, dispatch: Arc<DispatchTable>, connected: Arc<AtomicBool>) {
    let mut source = AsyncBincodeReader::<_, Message>::from(read);
    while let Some(next) = source.next().await {
        match next {
            Ok(msg) => dispatch.dispatch(&msg),
            Err(e) => {
                debug!("transport read failed: {e}");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}
