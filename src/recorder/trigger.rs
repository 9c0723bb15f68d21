//! Session trigger
//!
//! Turns edge interrupts (button presses) into session requests. At most one
//! request is remembered: presses while a request is pending coalesce, and
//! presses while a session is running are rejected.

use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const BUSY: u8 = 2;

/// What happened to a trigger press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A session will start
    Accepted,
    /// A session was already requested
    Coalesced,
    /// A session is running
    Rejected,
}

/// Single-permit session request signal
///
/// `fire` never blocks and may be called from any thread.
#[derive(Debug, Default)]
pub struct SessionTrigger {
    state: AtomicU8,
    notify: Notify,
    idle: Notify,
}

impl SessionTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a session
    pub fn fire(&self) -> TriggerOutcome {
        match self
            .state
            .compare_exchange(IDLE, PENDING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.notify.notify_one();
                TriggerOutcome::Accepted
            }
            Err(PENDING) => TriggerOutcome::Coalesced,
            Err(_) => {
                tracing::debug!("Trigger ignored, session in progress");
                TriggerOutcome::Rejected
            }
        }
    }

    /// Wait for a request and mark the session as running
    ///
    /// The returned guard clears the running mark when dropped.
    pub async fn wait(&self) -> ActiveSession<'_> {
        loop {
            let notified = self.notify.notified();
            if self
                .state
                .compare_exchange(PENDING, BUSY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return ActiveSession { trigger: self };
            }
            notified.await;
        }
    }

    /// Wait until no session is requested or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.load(Ordering::Acquire) == IDLE {
                return;
            }
            notified.await;
        }
    }

    /// Whether a request is waiting to be picked up
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Whether a session is running
    pub fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) == BUSY
    }
}

/// Marks a triggered session as running
#[derive(Debug)]
pub struct ActiveSession<'a> {
    trigger: &'a SessionTrigger,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.trigger.state.store(IDLE, Ordering::Release);
        self.trigger.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_presses_while_idle_coalesce() {
        let trigger = SessionTrigger::new();
        assert_eq!(trigger.fire(), TriggerOutcome::Accepted);
        assert_eq!(trigger.fire(), TriggerOutcome::Coalesced);
        assert_eq!(trigger.fire(), TriggerOutcome::Coalesced);

        let session = trigger.wait().await;
        assert!(trigger.is_busy());
        drop(session);

        // Only one request was remembered.
        let second = tokio::time::timeout(Duration::from_millis(20), trigger.wait()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_presses_while_busy_are_rejected() {
        let trigger = SessionTrigger::new();
        trigger.fire();
        let session = trigger.wait().await;

        assert_eq!(trigger.fire(), TriggerOutcome::Rejected);
        drop(session);
        assert!(!trigger.is_pending());
        assert_eq!(trigger.fire(), TriggerOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_wait_idle_follows_session_end() {
        let trigger = Arc::new(SessionTrigger::new());
        trigger.wait_idle().await;

        trigger.fire();
        let idle = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.wait_idle().await })
        };

        // Pending, then running: still not idle.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!idle.is_finished());
        let session = trigger.wait().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!idle.is_finished());

        drop(session);
        tokio::time::timeout(Duration::from_secs(1), idle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_fire_from_other_thread_wakes_waiter() {
        let trigger = Arc::new(SessionTrigger::new());
        let waiter = {
            let trigger = trigger.clone();
            tokio::spawn(async move {
                let _session = trigger.wait().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let remote = trigger.clone();
        std::thread::spawn(move || remote.fire()).join().unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
