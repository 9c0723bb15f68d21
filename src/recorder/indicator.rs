//! Session indicator (status LED)

use std::sync::atomic::{AtomicBool, Ordering};

/// Binary "session active" output
pub trait Indicator: Send + Sync {
    fn set_active(&self, active: bool);
}

/// Indicator that logs transitions
#[derive(Debug, Default)]
pub struct LogIndicator {
    active: AtomicBool,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

impl Indicator for LogIndicator {
    fn set_active(&self, active: bool) {
        if self.active.swap(active, Ordering::Relaxed) != active {
            tracing::info!("Indicator {}", if active { "on" } else { "off" });
        }
    }
}
