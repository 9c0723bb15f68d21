//! In-memory transport
//!
//! Records everything sent into a shared buffer. Sends can be stalled to
//! simulate a slow link and made to fail to exercise error paths.

use super::serial::{SerialTransport, TransportError, TxCompletion, TxPending};
use crate::memory::Slot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

struct PendingSend {
    slot: Slot,
    done: oneshot::Sender<TxCompletion>,
}

#[derive(Default)]
struct MemoryShared {
    wire: Mutex<Vec<u8>>,
    stalled: Mutex<Option<VecDeque<PendingSend>>>,
    fail_sends: AtomicBool,
    async_sends: AtomicUsize,
}

/// Loopback transport backed by a byte vector
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn wire(&self) -> Vec<u8> {
        self.shared.wire.lock().clone()
    }

    /// Number of asynchronous sends issued
    pub fn async_sends(&self) -> usize {
        self.shared.async_sends.load(Ordering::SeqCst)
    }

    /// Hold back completions until [`resume`](Self::resume)
    pub fn stall(&self) {
        let mut stalled = self.shared.stalled.lock();
        if stalled.is_none() {
            *stalled = Some(VecDeque::new());
        }
    }

    /// Complete every held send in order and stop stalling
    pub fn resume(&self) {
        let pending = self.shared.stalled.lock().take().unwrap_or_default();
        for send in pending {
            self.complete(send.slot, send.done);
        }
    }

    /// Sends currently held by a stall
    pub fn pending_sends(&self) -> usize {
        self.shared
            .stalled
            .lock()
            .as_ref()
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Make subsequent asynchronous sends fail
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn complete(&self, slot: Slot, done: oneshot::Sender<TxCompletion>) {
        let result = if self.shared.fail_sends.load(Ordering::SeqCst) {
            Err(TransportError::Rejected("injected send failure".to_string()))
        } else {
            self.shared.wire.lock().extend_from_slice(slot.as_slice());
            Ok(())
        };
        let _ = done.send(TxCompletion { slot, result });
    }
}

impl SerialTransport for MemoryTransport {
    fn send_async(&self, chunk: Slot) -> TxPending {
        let (tx, rx) = oneshot::channel();
        self.shared.async_sends.fetch_add(1, Ordering::SeqCst);

        let mut stalled = self.shared.stalled.lock();
        match stalled.as_mut() {
            Some(queue) => queue.push_back(PendingSend { slot: chunk, done: tx }),
            None => {
                drop(stalled);
                self.complete(chunk, tx);
            }
        }
        rx
    }

    fn send_blocking_byte(&self, byte: u8) -> Result<(), TransportError> {
        self.shared.wire.lock().push(byte);
        Ok(())
    }
}
