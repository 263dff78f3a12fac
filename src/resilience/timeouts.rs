//! Idle-data watchdog.
//!
//! # Responsibilities
//! - Abort an operation when no response data arrives within the window
//! - Stop watching once data starts flowing, without leaking the timer
//! - Tell a timeout apart from an explicit cancel
//!
//! # Design Decisions
//! - Uses Tokio's timer in a spawned task that trips the operation's token
//! - Disarm aborts the task; dropping the watchdog disarms it too

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;

/// A single armed timeout race for one operation.
#[derive(Debug)]
pub struct IdleWatchdog {
    window: Duration,
    fired: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl IdleWatchdog {
    /// Start the watchdog. When it fires it cancels `token`.
    pub fn arm(window: Duration, token: CancellationToken) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    flag.store(true, Ordering::SeqCst);
                    tracing::warn!(window = ?window, "Idle timeout: no response data received");
                    token.cancel();
                }
            }
        });

        Self {
            window,
            fired,
            task: Some(task),
        }
    }

    /// Stop the watchdog. Returns `true` if it was still armed.
    pub fn disarm(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                tracing::debug!("Response data received, idle timeout disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// The error to report when the operation's token has been cancelled.
    pub fn interruption(&self) -> RelayError {
        if self.has_fired() {
            RelayError::Timeout(self.window.as_secs())
        } else {
            RelayError::Aborted
        }
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
