//! Transport writer task
//!
//! Drains the transport queue for the lifetime of the pipeline. Each chunk
//! is sent asynchronously and the writer waits for its completion before
//! touching the next item, so there is never more than one send in flight.
//! The end-of-session sentinel produces the `SessionEnd` marker.

use super::framing::{self, Marker};
use super::queue::{QueueConsumer, SessionTicket, TransportItem};
use super::serial::SerialTransport;
use crate::memory::{BufferPool, Slot};
use crate::recorder::state::SessionEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Counters kept by the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    /// Chunks whose send completed successfully
    pub chunks_written: u64,

    /// Chunks whose send completed with an error
    pub send_failures: u64,

    /// Slots the transport never handed back
    pub lost_slots: u64,

    /// End markers emitted
    pub sessions_closed: u64,
}

/// Consumer side of the pipeline
pub struct TransportWriter {
    queue: QueueConsumer,
    pool: Arc<BufferPool>,
    transport: Arc<dyn SerialTransport>,
    events: broadcast::Sender<SessionEvent>,
    stats: WriterStats,
    session_chunks: usize,
}

impl TransportWriter {
    pub fn new(
        queue: QueueConsumer,
        pool: Arc<BufferPool>,
        transport: Arc<dyn SerialTransport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            queue,
            pool,
            transport,
            events,
            stats: WriterStats::default(),
            session_chunks: 0,
        }
    }

    /// Process items until the producer side is dropped
    pub async fn run(mut self) -> WriterStats {
        tracing::debug!("Transport writer started");

        while let Some(item) = self.queue.recv().await {
            match item {
                TransportItem::Chunk(slot) => self.transmit(slot).await,
                TransportItem::EndOfSession(ticket) => self.close_session(ticket),
            }
        }

        tracing::debug!("Transport queue closed, writer exiting: {:?}", self.stats);
        self.stats
    }

    async fn transmit(&mut self, slot: Slot) {
        let index = slot.index();
        let completion = match self.transport.send_async(slot).await {
            Ok(completion) => completion,
            Err(_) => {
                self.stats.lost_slots += 1;
                tracing::error!("Transport dropped slot {} without completing", index);
                return;
            }
        };

        match completion.result {
            Ok(()) => {
                self.stats.chunks_written += 1;
                self.session_chunks += 1;
                tracing::trace!("Chunk in slot {} sent", index);
            }
            Err(e) => {
                // No retry policy for the link; the chunk is gone.
                self.stats.send_failures += 1;
                tracing::warn!("Failed to send chunk in slot {}: {}", index, e);
            }
        }

        if let Err(e) = self.pool.release(completion.slot) {
            tracing::error!("Failed to return slot {} to pool: {}", index, e);
        }
    }

    fn close_session(&mut self, ticket: SessionTicket) {
        if let Err(e) = framing::send_marker(self.transport.as_ref(), Marker::SessionEnd) {
            tracing::warn!("Failed to send end marker: {}", e);
        }
        self.stats.sessions_closed += 1;

        let chunks_written = std::mem::take(&mut self.session_chunks);
        let id = ticket.id();
        tracing::info!(
            "Session {} drained: {} of {} queued chunks written",
            id,
            chunks_written,
            ticket.chunks_queued()
        );

        // Dropping the ticket frees the wire for the next session.
        drop(ticket);
        let _ = self.events.send(SessionEvent::Drained { id, chunks_written });
    }
}
