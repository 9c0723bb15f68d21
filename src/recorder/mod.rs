//! Capture session control
//!
//! This module implements the producer side of the pipeline:
//! - StreamConfig loaded from JSON
//! - SessionController running one capture session per trigger
//! - SessionTrigger coalescing button presses
//! - Indicator reflecting whether a session is active

pub mod config;
pub mod coordinator;
pub mod indicator;
pub mod state;
pub mod trigger;

pub use config::StreamConfig;
pub use coordinator::{run_control_loop, SessionController};
pub use indicator::{Indicator, LogIndicator};
pub use state::{SessionEvent, SessionOutcome, SessionReport, SessionState};
pub use trigger::{ActiveSession, SessionTrigger, TriggerOutcome};
