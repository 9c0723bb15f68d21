//! Serial transport interface
//!
//! A transport has two paths. The asynchronous path takes ownership of a
//! filled slot and hands it back through a one-shot completion once the
//! bytes are out. The synchronous path pushes single bytes and is reserved
//! for framing markers.
//!
//! The synchronous path blocks the calling thread, which for the writer is
//! a runtime worker. It only ever carries the handful of marker bytes at a
//! session boundary, so it runs inline rather than on the blocking pool.

use crate::memory::Slot;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Send rejected: {0}")]
    Rejected(String),

    #[error("Transport closed")]
    Closed,
}

/// Completion notification for one asynchronous send
#[derive(Debug)]
pub struct TxCompletion {
    /// The slot that was sent, returned to the caller
    pub slot: Slot,
    /// Outcome of the send
    pub result: Result<(), TransportError>,
}

/// Resolves once the matching send has finished
pub type TxPending = oneshot::Receiver<TxCompletion>;

/// Byte transport the writer streams chunks over
pub trait SerialTransport: Send + Sync {
    /// Start sending the slot's payload; completion arrives on the returned
    /// receiver together with the slot
    fn send_async(&self, chunk: Slot) -> TxPending;

    /// Send one byte, returning once it has been handed to the device
    ///
    /// Blocks the calling thread.
    fn send_blocking_byte(&self, byte: u8) -> Result<(), TransportError>;

    /// Push out bytes the synchronous path may have buffered
    fn flush_blocking(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Transport over any blocking writer (stdout, a file, a tty)
///
/// Asynchronous sends run on the blocking thread pool when a tokio runtime
/// is available and on a dedicated thread otherwise.
pub struct IoTransport<W> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> IoTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_payload(writer: &Mutex<W>, payload: &[u8]) -> Result<(), TransportError> {
        let mut writer = writer.lock();
        writer.write_all(payload)?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send + 'static> SerialTransport for IoTransport<W> {
    fn send_async(&self, chunk: Slot) -> TxPending {
        let (tx, rx) = oneshot::channel();
        let writer = self.writer.clone();

        let job = move || {
            let result = Self::write_payload(&writer, chunk.as_slice());
            // The writer may have gone away; nothing left to notify then.
            let _ = tx.send(TxCompletion { slot: chunk, result });
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }

        rx
    }

    /// Buffered in the writer until `flush_blocking` or the next payload
    fn send_blocking_byte(&self, byte: u8) -> Result<(), TransportError> {
        self.writer.lock().write_all(&[byte])?;
        Ok(())
    }

    fn flush_blocking(&self) -> Result<(), TransportError> {
        self.writer.lock().flush()?;
        Ok(())
    }
}
