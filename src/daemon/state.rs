//! # Daemon states.
//!
//! Exactly one of five states at any time. Valid transitions:
//!
//! ```text
//! idle → promoting        ASSIGN addressed to self (while idle)
//! promoting → active      supervisor approval, executor spawned
//! promoting → idle        supervisor denial
//! active → demoting       executor exit (any code)
//! demoting → idle         completion record written
//! active → crashed        spawn or irrecoverable runtime error
//! ```
//!
//! `crashed` is terminal: the supervisor discards the daemon and spawns a
//! fresh one in its slot.

/// State of one daemon slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Idling on the bus, emitting heartbeats.
    Idle,
    /// Waiting for the supervisor's admission verdict.
    Promoting,
    /// Owning a running executor.
    Active,
    /// Executor exited; finishing bookkeeping.
    Demoting,
    /// Terminal failure; the slot will be replaced.
    Crashed,
}

impl DaemonState {
    /// Stable snake_case name for logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Idle => "idle",
            DaemonState::Promoting => "promoting",
            DaemonState::Active => "active",
            DaemonState::Demoting => "demoting",
            DaemonState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
