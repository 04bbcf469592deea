//! # Read-only projections of supervisor state.

use std::time::Duration;

use crate::bus::TaskBrief;
use crate::daemon::DaemonState;

/// Snapshot of the whole swarm.
#[derive(Debug, Clone)]
pub struct SwarmStatus {
    /// Whether the supervisor is running.
    pub running: bool,
    /// Time since `start()`.
    pub uptime: Duration,
    /// Fleet size.
    pub total: usize,
    /// Daemons with a running executor.
    pub active: usize,
    /// Idle daemons.
    pub idle: usize,
    /// Daemons awaiting an admission verdict.
    pub promoting: usize,
    /// Crashed slots awaiting replacement (or degraded).
    pub crashed: usize,
    /// Whether promotion gating is engaged.
    pub promotions_paused: bool,
    /// Pending promotion requests.
    pub queue_length: usize,
    /// Per-agent details.
    pub agents: Vec<AgentStatus>,
}

/// Snapshot of one slot.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    /// Stable agent id.
    pub agent_id: String,
    /// Human name.
    pub name: String,
    /// Current state.
    pub state: DaemonState,
    /// Role served.
    pub role: String,
    /// Restarts in the current burst.
    pub restart_count: u32,
    /// Task attached while not idle.
    pub current_task: Option<TaskBrief>,
}

/// Outcome of a `scale()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleReport {
    /// Fleet size before.
    pub from: usize,
    /// Fleet size after.
    pub to: usize,
    /// Daemons spawned.
    pub added: usize,
    /// Daemons removed.
    pub removed: usize,
}

/// Runtime-adjustable configuration fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigPatch {
    /// New admission cap.
    pub max_active: Option<usize>,
    /// New token budget (`0` disables gating).
    pub token_budget: Option<u64>,
    /// Heartbeat cadence for daemons spawned from now on.
    pub heartbeat_interval: Option<Duration>,
}
