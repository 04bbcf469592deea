//! # Process-table entries.
//!
//! The table maps `agentId` → [`DaemonRecord`] and is owned exclusively by
//! the supervisor's serialized state. Nothing outside the supervisor ever
//! sees it by reference; `status()` exposes snapshots.

use std::sync::Arc;
use std::time::Instant;

use crate::daemon::Daemon;

/// One slot in the process table.
pub(crate) struct DaemonRecord {
    /// The daemon instance.
    pub daemon: Arc<Daemon>,
    /// Restarts since the current burst began.
    pub restart_count: u32,
    /// When the current burst began; `None` until the first crash.
    pub first_restart_at: Option<Instant>,
    /// Instant of the last successful (re)start.
    pub stable_since: Instant,
    /// Guard against double-scheduling a backoff restart.
    pub restart_scheduled: bool,
}

impl DaemonRecord {
    /// Fresh record for a newly spawned daemon.
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self {
            daemon,
            restart_count: 0,
            first_restart_at: None,
            stable_since: Instant::now(),
            restart_scheduled: false,
        }
    }
}
