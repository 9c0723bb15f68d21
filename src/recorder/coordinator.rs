//! Session controller
//!
//! Runs one capture session at a time: configure the device, discard one
//! warmup block, then read chunks into pool buffers and queue them for the
//! transport writer. Every failure is scoped to the session; the controller
//! always returns to `Idle` ready for the next trigger.

use super::config::StreamConfig;
use super::indicator::Indicator;
use super::state::{SessionEvent, SessionOutcome, SessionReport, SessionState};
use super::trigger::SessionTrigger;
use crate::capture::{CaptureDevice, CaptureResult};
use crate::memory::{BufferPool, Slot};
use crate::transport::framing::{self, Marker};
use crate::transport::{PushError, QueueProducer, SerialTransport, SessionTicket, TransportItem};
use crate::utils::{ErrorResponse, StreamError, StreamResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Semaphore};
use uuid::Uuid;

/// Producer side of the pipeline
pub struct SessionController {
    config: StreamConfig,

    device: Box<dyn CaptureDevice>,

    pool: Arc<BufferPool>,

    queue: QueueProducer,

    transport: Arc<dyn SerialTransport>,

    /// One permit: the wire belongs to at most one session at a time
    wire: Arc<Semaphore>,

    state: watch::Sender<SessionState>,

    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: StreamConfig,
        device: Box<dyn CaptureDevice>,
        pool: Arc<BufferPool>,
        queue: QueueProducer,
        transport: Arc<dyn SerialTransport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            device,
            pool,
            queue,
            transport,
            wire: Arc::new(Semaphore::new(1)),
            state,
            events,
        }
    }

    /// Current controller state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Run one complete session
    ///
    /// Returns an error only when the device could not be configured or
    /// started; early terminations are reported through the outcome.
    pub async fn run_session(&mut self) -> StreamResult<SessionReport> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        // Wait until the previous session's end marker is on the wire.
        let permit = self
            .wire
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StreamError::Shutdown)?;
        let mut ticket = SessionTicket::new(id, permit);

        self.set_state(SessionState::Configuring);
        if let Err(e) = self.prepare_device().await {
            let error = StreamError::from(e);
            tracing::error!("Failed to prepare {}: {}", self.device.name(), error);
            self.set_state(SessionState::Idle);
            let _ = self.events.send(SessionEvent::Failed {
                id,
                error: ErrorResponse::from(&error),
            });
            return Err(error);
        }

        self.set_state(SessionState::Warmup);
        self.discard_warmup_block().await;

        if let Err(e) = framing::send_marker(self.transport.as_ref(), Marker::SessionStart) {
            tracing::warn!("Failed to send start marker: {}", e);
        }
        let _ = self.events.send(SessionEvent::Started { id });
        tracing::info!("Session {} streaming {} chunks", id, self.config.total_chunks());

        let (chunks_queued, outcome) = self.stream_chunks().await;

        self.set_state(SessionState::Draining);
        if let Err(e) = self.device.stop().await {
            tracing::warn!("Failed to stop {}: {}", self.device.name(), e);
        }
        ticket.set_chunks_queued(chunks_queued);
        if let Err(e) = self.queue.push_unbounded(TransportItem::EndOfSession(ticket)).await {
            tracing::error!("Failed to queue end of session: {}", e);
        }
        self.set_state(SessionState::Idle);

        let report = SessionReport {
            id,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            chunks_queued,
            total_chunks: self.config.total_chunks(),
            outcome,
        };

        tracing::info!(
            "Audio capture finished: {}/{} chunks queued ({:?})",
            report.chunks_queued,
            report.total_chunks,
            report.outcome
        );
        let _ = self.events.send(SessionEvent::Finished(report.clone()));
        Ok(report)
    }

    async fn prepare_device(&mut self) -> CaptureResult<()> {
        self.device.configure(&self.config.capture_config()).await?;
        self.device.start().await
    }

    /// Flush whatever the hardware had buffered before it settled
    async fn discard_warmup_block(&mut self) {
        let mut slot = match self.pool.try_acquire() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!("No buffer for discard read: {}", e);
                return;
            }
        };

        if let Err(e) = self
            .device
            .read(slot.as_mut_slice(), self.config.read_timeout())
            .await
        {
            tracing::warn!("Failed to read discard chunk: {}", e);
        }
        self.release(slot);
    }

    async fn stream_chunks(&mut self) -> (usize, SessionOutcome) {
        let total = self.config.total_chunks();

        for chunk in 0..total {
            self.set_state(SessionState::Streaming { chunk });

            let mut slot = match self.pool.try_acquire() {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::error!("No free buffer for chunk {}: {}", chunk, e);
                    return (chunk, SessionOutcome::PoolExhausted);
                }
            };

            if let Err(e) = self
                .device
                .read(slot.as_mut_slice(), self.config.read_timeout())
                .await
            {
                tracing::error!("Failed to read chunk {}: {}", chunk, e);
                self.release(slot);
                return (chunk, SessionOutcome::CaptureFailed(e.to_string()));
            }

            match self
                .queue
                .push(TransportItem::Chunk(slot), self.config.enqueue_timeout())
                .await
            {
                Ok(()) => tracing::debug!("Queued chunk {}", chunk),
                Err(err) => {
                    match &err {
                        PushError::Full(_) => tracing::error!(
                            "Failed to queue chunk {}. Transport writer might be too slow.",
                            chunk
                        ),
                        PushError::Closed(_) => {
                            tracing::error!("Failed to queue chunk {}: writer is gone", chunk)
                        }
                    }
                    if let TransportItem::Chunk(slot) = err.into_item() {
                        self.release(slot);
                    }
                    return (chunk, SessionOutcome::Backpressure);
                }
            }
        }

        (total, SessionOutcome::Completed)
    }

    fn release(&self, slot: Slot) {
        let index = slot.index();
        if let Err(e) = self.pool.release(slot) {
            tracing::error!("Failed to return slot {} to pool: {}", index, e);
        }
    }
}

/// Wait for triggers and run one session per trigger, forever
pub async fn run_control_loop(
    mut controller: SessionController,
    trigger: Arc<SessionTrigger>,
    indicator: Arc<dyn Indicator>,
) {
    indicator.set_active(false);
    tracing::info!("Audio streamer ready, waiting for trigger");

    loop {
        let active = trigger.wait().await;
        tracing::info!("Trigger received, starting capture");

        indicator.set_active(true);
        if let Err(e) = controller.run_session().await {
            tracing::error!("Session aborted before streaming: {}", e);
        }
        indicator.set_active(false);
        drop(active);

        tracing::info!("Waiting for next trigger");
    }
}
