//! Human-readable progress reporting.
//!
//! The relay publishes one "last status" line that UIs poll for display.
//! It is process-wide and last-write-wins: concurrent orchestrations
//! overwrite each other and no ordering is promised.
//!
//! ```text
//! startup           --> SharedProgress::new()  (once, held in AppState)
//! orchestration     --> set_status("Polling video job (3/50)")
//! GET /api/progress --> status()
//! ```

use std::sync::RwLock;

/// Write side of progress reporting, plus a read of the latest line.
pub trait ProgressSink: Send + Sync {
    /// Record a progress line. Must not block or fail.
    fn set_status(&self, message: &str);

    /// The most recent line.
    fn status(&self) -> String;
}

/// Shared last-status holder.
#[derive(Debug)]
pub struct SharedProgress {
    latest: RwLock<String>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new("Idle".to_string()),
        }
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for SharedProgress {
    fn set_status(&self, message: &str) {
        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        *latest = message.to_string();
    }

    fn status(&self) -> String {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Discards every update.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_status(&self, _message: &str) {}

    fn status(&self) -> String {
        String::new()
    }
}
