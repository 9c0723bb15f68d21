//! Session state management
//!
//! Defines the controller state machine, session reports and the events
//! broadcast while sessions run.

use crate::utils::ErrorResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum SessionState {
    /// Waiting for a trigger
    #[default]
    Idle,
    /// Applying device configuration
    Configuring,
    /// Discarding the first block
    Warmup,
    /// Capturing chunk `chunk` of the session
    Streaming { chunk: usize },
    /// Stopping the device and queueing the sentinel
    Draining,
}

impl SessionState {
    /// Whether a session is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum SessionOutcome {
    /// Every chunk was captured and queued
    Completed,
    /// A capture read failed mid-session
    CaptureFailed(String),
    /// No free buffer for the next chunk
    PoolExhausted,
    /// The transport queue stayed full past the enqueue timeout
    Backpressure,
}

impl SessionOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, SessionOutcome::Completed)
    }
}

/// Summary of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Session identifier
    pub id: Uuid,

    /// Wall-clock start time
    pub started_at: DateTime<Utc>,

    /// Time from trigger to sentinel queued
    pub duration_ms: u64,

    /// Chunks handed to the transport queue
    pub chunks_queued: usize,

    /// Chunks a complete session would have
    pub total_chunks: usize,

    /// Why the session ended
    pub outcome: SessionOutcome,
}

/// Events emitted while sessions run
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The device is configured and the start marker is on the wire
    Started { id: Uuid },
    /// The controller finished capturing; chunks may still be in transit
    Finished(SessionReport),
    /// The session never started streaming
    Failed { id: Uuid, error: ErrorResponse },
    /// The writer emitted the end marker
    Drained { id: Uuid, chunks_written: usize },
}
