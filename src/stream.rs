//! Transport ownership and hand-off between message writers.
//!
//! A connection has one transport but may have several queued outbound
//! messages. The [`StreamHandle`] serializes access: a writer either adopts
//! the transport immediately or parks on a waiter that is completed when the
//! current owner releases it. Waiters are served in FIFO order, so message
//! bytes leave the connection in the order the writers were created.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_channel::oneshot;

/// The write half of a connection, as the codec sees it.
///
/// `poll_drain` is the backpressure checkpoint: it returns `Pending` while
/// the peer is not keeping up and the write buffer is over its high-water
/// mark. The default implementations make a transport that never pushes
/// back and ignores socket options.
pub trait Transport {
    /// Queues bytes for the peer. Must not block.
    fn write(&mut self, data: &[u8]);

    /// Polls until the transport's write buffer has drained below its
    /// high-water mark.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let _ = cx;
        Poll::Ready(())
    }

    /// Sets TCP_NODELAY on the underlying socket, if there is one.
    fn set_nodelay(&mut self, enabled: bool) {
        let _ = enabled;
    }

    /// Sets TCP_CORK on the underlying socket, if there is one.
    fn set_cork(&mut self, enabled: bool) {
        let _ = enabled;
    }
}

/// Shared owner of a transport, handing it to one writer at a time.
pub struct StreamHandle<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

struct Inner<T> {
    transport: Option<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

pub(crate) enum Acquire<T> {
    /// The stream was idle; the transport is adopted immediately.
    Ready(T),
    /// Another writer owns the transport; completed on its release.
    Later(oneshot::Receiver<T>),
}

impl<T> StreamHandle<T> {
    /// Creates a stream handle owning an idle transport.
    pub fn new(transport: T) -> StreamHandle<T> {
        StreamHandle {
            inner: Arc::new(Mutex::new(Inner {
                transport: Some(transport),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Whether the transport is idle and would be adopted immediately.
    pub fn is_available(&self) -> bool {
        self.inner.lock().unwrap().transport.is_some()
    }

    pub(crate) fn acquire(&self) -> Acquire<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(transport) = inner.transport.take() {
            Acquire::Ready(transport)
        } else {
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            Acquire::Later(rx)
        }
    }

    /// Returns the transport, waking the next parked writer if any.
    ///
    /// A waiter whose writer has been dropped is skipped.
    pub fn release(&self, transport: T) {
        let mut inner = self.inner.lock().unwrap();
        let mut transport = transport;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.send(transport) {
                Ok(()) => return,
                Err(returned) => transport = returned,
            }
        }
        inner.transport = Some(transport);
    }
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> StreamHandle<T> {
        StreamHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("StreamHandle")
            .field("available", &inner.transport.is_some())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}
