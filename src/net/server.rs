use log::{debug, error};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};

use super::socket::TransportSocket;
use crate::url::Url;

const ACCEPT_BACKLOG: u32 = 1024;

/// Callbacks a [`TransportServer`] delivers to its owner.
pub trait TransportServerDelegate: Send + Sync {
    /// Fired once per accepted socket, from the accept task. The delegate is
    /// expected to drain via
    /// [`next_pending_connection`](TransportServer::next_pending_connection);
    /// draining is idempotent, so coalescing notifications is harmless.
    fn new_connection(&self);
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already listening")]
    AlreadyListening,

    #[error("bind failed: {0}")]
    Bind(#[from] io::Error),
}

/// Listener that accepts inbound connections, wraps each into a
/// [`TransportSocket`], and parks it in a FIFO queue until the delegate
/// collects it.
///
/// The queue is mutex-guarded, so the delegate may drain from the accept
/// task's `new_connection` callback or from any other thread.
#[derive(Default)]
pub struct TransportServer {
    inner: Arc<ServerInner>,
}

#[derive(Default)]
struct ServerInner {
    pending: Mutex<VecDeque<Arc<TransportSocket>>>,
    delegate: Mutex<Option<Arc<dyn TransportServerDelegate>>>,
    endpoint: Mutex<Option<SocketAddr>>,
}

impl TransportServer {
    pub fn new() -> TransportServer {
        TransportServer::default()
    }

    /// Binds `url` with address reuse and spawns the accept loop on the
    /// current runtime. Listening is terminal: a started server accepts
    /// until it is dropped, and a second `start` is an error.
    ///
    /// Port 0 requests an ephemeral port; [`endpoint`](Self::endpoint)
    /// reports the address actually bound.
    pub async fn start(&self, url: &Url) -> Result<(), ServerError> {
        {
            let mut endpoint = self.inner.endpoint.lock();
            if endpoint.is_some() {
                return Err(ServerError::AlreadyListening);
            }
            // Reserve the slot so a racing start fails fast; the real
            // address replaces it below.
            *endpoint = Some(SocketAddr::from((url.host(), url.port())));
        }

        let listener = match bind(url) {
            Ok(listener) => listener,
            Err(e) => {
                *self.inner.endpoint.lock() = None;
                error!("failed to bind {url}: {e}");
                return Err(ServerError::Bind(e));
            }
        };
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                *self.inner.endpoint.lock() = None;
                return Err(ServerError::Bind(e));
            }
        };
        *self.inner.endpoint.lock() = Some(local);
        debug!("transport server listening on {local}");

        tokio::spawn(accept_loop(listener, self.inner.clone()));
        Ok(())
    }

    /// The bound address, once [`start`](Self::start) has succeeded.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.inner.endpoint.lock()
    }

    /// Pops the oldest accepted socket, or `None` when the queue is empty.
    /// Never blocks.
    pub fn next_pending_connection(&self) -> Option<Arc<TransportSocket>> {
        self.inner.pending.lock().pop_front()
    }

    /// Installs or replaces the delegate. Connections accepted before a
    /// delegate is installed stay queued, but their `new_connection`
    /// notifications are lost.
    pub fn set_delegate(&self, delegate: Arc<dyn TransportServerDelegate>) {
        *self.inner.delegate.lock() = Some(delegate);
    }
}

fn bind(url: &Url) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((url.host(), url.port())))?;
    socket.listen(ACCEPT_BACKLOG)
}

async fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let socket = match TransportSocket::from_stream(stream) {
                    Ok(socket) => socket,
                    Err(e) => {
                        error!("dropping connection from {peer}: {e}");
                        continue;
                    }
                };
                inner.pending.lock().push_back(socket);
                debug!("accepted connection from {peer}");
                let delegate = inner.delegate.lock().clone();
                if let Some(delegate) = delegate {
                    delegate.new_connection();
                }
            }
            // Transient accept failures (e.g. fd exhaustion) must not end
            // the listener.
            Err(e) => error!("accept failed: {e}"),
        }
    }
}
