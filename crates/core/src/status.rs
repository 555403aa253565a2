//! The single user-visible status line.

use tokio::sync::watch;
use tracing::{info, warn};

/// Snapshot of the status channel. `error` takes display precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub status: String,
    pub error: String,
}

impl StatusLine {
    pub fn current(&self) -> &str {
        if self.error.is_empty() {
            &self.status
        } else {
            &self.error
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Owns the status line and publishes every change to watchers.
#[derive(Debug)]
pub struct StatusChannel {
    tx: watch::Sender<StatusLine>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusLine::default());
        Self { tx }
    }

    /// Returns a receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<StatusLine> {
        self.tx.subscribe()
    }

    /// Replaces the status and clears any previous error.
    pub fn update_status(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(status = %msg, "Status updated");
        self.tx.send_modify(|line| {
            line.status = msg;
            line.error.clear();
        });
    }

    pub fn update_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(error = %msg, "Error status raised");
        self.tx.send_modify(|line| line.error = msg);
    }

    pub fn snapshot(&self) -> StatusLine {
        self.tx.borrow().clone()
    }

    pub fn current(&self) -> String {
        self.tx.borrow().current().to_string()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}
