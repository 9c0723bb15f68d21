//! Pipeline assembly
//!
//! Wires the pool, queue, controller and writer together and runs the
//! control loop and the writer as two independent tasks.

use crate::capture::CaptureDevice;
use crate::memory::BufferPool;
use crate::recorder::{
    run_control_loop, Indicator, SessionController, SessionEvent, SessionState, SessionTrigger,
    StreamConfig, TriggerOutcome,
};
use crate::transport::{transport_queue, SerialTransport, TransportWriter, WriterStats};
use crate::utils::{StreamError, StreamResult};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Running capture-and-stream pipeline
pub struct Streamer {
    trigger: Arc<SessionTrigger>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    pool: Arc<BufferPool>,
    control: JoinHandle<()>,
    writer: JoinHandle<WriterStats>,
}

impl Streamer {
    /// Validate the configuration and start both tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: StreamConfig,
        device: Box<dyn CaptureDevice>,
        transport: Arc<dyn SerialTransport>,
        indicator: Arc<dyn Indicator>,
    ) -> StreamResult<Self> {
        config.validate()?;

        let pool = Arc::new(BufferPool::new(
            config.pool_capacity,
            config.chunk_bytes(),
            config.alignment,
        )?);
        let (producer, consumer) = transport_queue(pool.capacity());
        let (events, _) = broadcast::channel(64);

        tracing::info!(
            "Pipeline: {} Hz, {} bit, {} bytes per chunk, {} chunks per session, {} buffers",
            config.sample_rate_hz,
            config.bit_width,
            config.chunk_bytes(),
            config.total_chunks(),
            pool.capacity()
        );

        let writer = TransportWriter::new(consumer, pool.clone(), transport.clone(), events.clone());
        let controller =
            SessionController::new(config, device, pool.clone(), producer, transport, events.clone());
        let state = controller.watch_state();
        let trigger = Arc::new(SessionTrigger::new());

        let writer = tokio::spawn(writer.run());
        let control = tokio::spawn(run_control_loop(controller, trigger.clone(), indicator));

        Ok(Self {
            trigger,
            state,
            events,
            pool,
            control,
            writer,
        })
    }

    /// Request a session, as a button press would
    pub fn fire(&self) -> TriggerOutcome {
        self.trigger.fire()
    }

    /// Shared trigger, for handing to an interrupt source
    pub fn trigger(&self) -> Arc<SessionTrigger> {
        self.trigger.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Controller state snapshot
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow controller state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Let any requested or running session finish, then stop both tasks
    /// once the writer has drained the queue
    pub async fn shutdown(self) -> StreamResult<WriterStats> {
        self.trigger.wait_idle().await;

        // Dropping the controller closes the queue; the writer exits after
        // draining what is left in it.
        self.control.abort();
        let _ = self.control.await;

        let stats = self.writer.await.map_err(|_| StreamError::Shutdown)?;
        tracing::info!(
            "Pipeline stopped: {} chunks written, {} sessions closed",
            stats.chunks_written,
            stats.sessions_closed
        );
        Ok(stats)
    }
}
