//! Bounded handoff queue between capture and transport
//!
//! Single-producer, single-consumer FIFO of [`TransportItem`]s built on a
//! bounded tokio channel. The producer half belongs to the session
//! controller, the consumer half to the transport writer. A failed push
//! always hands the item back, so a slot is never dropped silently.

use crate::memory::Slot;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

/// Exclusive right to the wire for one session
///
/// Travels to the writer inside the end-of-session sentinel and is dropped
/// once the end marker has been sent.
#[derive(Debug)]
pub struct SessionTicket {
    id: Uuid,
    chunks_queued: usize,
    _permit: OwnedSemaphorePermit,
}

impl SessionTicket {
    pub fn new(id: Uuid, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            chunks_queued: 0,
            _permit: permit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Chunks the controller managed to queue in this session
    pub fn chunks_queued(&self) -> usize {
        self.chunks_queued
    }

    pub(crate) fn set_chunks_queued(&mut self, count: usize) {
        self.chunks_queued = count;
    }
}

/// Unit of work for the transport writer
#[derive(Debug)]
pub enum TransportItem {
    /// A filled buffer to put on the wire
    Chunk(Slot),
    /// No more chunks in this session
    EndOfSession(SessionTicket),
}

/// Push failures; both variants return the item to the caller
#[derive(Error, Debug)]
pub enum PushError {
    #[error("transport queue full")]
    Full(TransportItem),

    #[error("transport queue closed")]
    Closed(TransportItem),
}

impl PushError {
    /// Recover the item that could not be queued
    pub fn into_item(self) -> TransportItem {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

/// Pop failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    #[error("timed out waiting for a transport item")]
    TimedOut,

    #[error("transport queue closed")]
    Closed,
}

/// Create a queue holding at most `capacity` items
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn transport_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Producer half, owned by the session controller
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<TransportItem>,
}

impl QueueProducer {
    /// Push, waiting at most `timeout` for room
    pub async fn push(&self, item: TransportItem, timeout: Duration) -> Result<(), PushError> {
        self.tx.send_timeout(item, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(item) => PushError::Full(item),
            SendTimeoutError::Closed(item) => PushError::Closed(item),
        })
    }

    /// Push, waiting as long as it takes for room
    pub async fn push_unbounded(&self, item: TransportItem) -> Result<(), PushError> {
        self.tx.send(item).await.map_err(|e| PushError::Closed(e.0))
    }

    /// Push without waiting
    pub fn try_push(&self, item: TransportItem) -> Result<(), PushError> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => PushError::Full(item),
            TrySendError::Closed(item) => PushError::Closed(item),
        })
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half, owned by the transport writer
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<TransportItem>,
}

impl QueueConsumer {
    /// Pop, waiting at most `timeout`
    pub async fn pop(&mut self, timeout: Duration) -> Result<TransportItem, PopError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Ok(item),
            Ok(None) => Err(PopError::Closed),
            Err(_) => Err(PopError::TimedOut),
        }
    }

    /// Pop, waiting indefinitely; `None` once the producer is gone and the
    /// queue is empty
    pub async fn recv(&mut self) -> Option<TransportItem> {
        self.rx.recv().await
    }
}
