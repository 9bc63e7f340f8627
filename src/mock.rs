//! Test transport double shared by the writer test suites.

use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::stream::Transport;

/// A transport that records everything written to it.
///
/// Clones share state, so a test can keep a handle while the transport
/// itself moves into a stream. `set_pending_drains` scripts how many
/// `poll_drain` calls report backpressure before completing.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    written: Vec<u8>,
    pending_drains: usize,
    drain_calls: usize,
    nodelay: Option<bool>,
    cork: Option<bool>,
}

impl MockTransport {
    pub(crate) fn new() -> MockTransport {
        MockTransport::default()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.shared.lock().unwrap().written.clone()
    }

    pub(crate) fn set_pending_drains(&self, count: usize) {
        self.shared.lock().unwrap().pending_drains = count;
    }

    pub(crate) fn drain_calls(&self) -> usize {
        self.shared.lock().unwrap().drain_calls
    }

    pub(crate) fn nodelay(&self) -> Option<bool> {
        self.shared.lock().unwrap().nodelay
    }

    #[allow(dead_code)]
    pub(crate) fn cork(&self) -> Option<bool> {
        self.shared.lock().unwrap().cork
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) {
        self.shared.lock().unwrap().written.extend_from_slice(data);
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.drain_calls += 1;
        if shared.pending_drains > 0 {
            shared.pending_drains -= 1;
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }

    fn set_nodelay(&mut self, enabled: bool) {
        self.shared.lock().unwrap().nodelay = Some(enabled);
    }

    fn set_cork(&mut self, enabled: bool) {
        self.shared.lock().unwrap().cork = Some(enabled);
    }
}
