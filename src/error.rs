//! # Error types used by the swarmvisor runtime.
//!
//! This module defines the error enums of the crate:
//!
//! - [`SwarmError`] errors raised by the supervisor control plane.
//! - [`BusError`] errors raised by message-bus endpoints.
//! - [`SpawnError`] errors raised while launching an executor process.
//!
//! All types provide `as_label()` returning a short stable snake_case tag
//! for structured logs.

use thiserror::Error;

/// # Errors produced by the supervisor control plane.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SwarmError {
    /// The pidfile names a live process; only one supervisor may run per pidfile.
    #[error("supervisor already running (pid {pid})")]
    AlreadyRunning {
        /// PID found in the pidfile.
        pid: i32,
    },

    /// An operation that requires a running supervisor was called while stopped.
    #[error("supervisor is not running")]
    NotRunning,

    /// A daemon operation was invoked from the wrong state.
    ///
    /// The promotion protocol requires `promoting`; callers that race a state
    /// change get this instead of a panic and should treat the request as stale.
    #[error("daemon '{agent}' is not in state '{expected}'")]
    InvalidState {
        /// Agent id of the daemon.
        agent: String,
        /// State the operation requires.
        expected: &'static str,
    },

    /// The agent id is not present in the process table.
    #[error("unknown agent '{agent}'")]
    UnknownAgent {
        /// The missing agent id.
        agent: String,
    },

    /// Message-bus failure surfaced through a supervisor operation.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Pidfile could not be read, written, or removed.
    #[error("pidfile '{path}': {source}")]
    Pidfile {
        /// Pidfile path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Workspace provisioning or teardown failed.
    #[error("workspace error: {reason}")]
    Workspace {
        /// Human-readable description.
        reason: String,
    },

    /// Executor spawn failure surfaced through the promotion protocol.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl SwarmError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SwarmError::AlreadyRunning { .. } => "swarm_already_running",
            SwarmError::NotRunning => "swarm_not_running",
            SwarmError::InvalidState { .. } => "swarm_invalid_state",
            SwarmError::UnknownAgent { .. } => "swarm_unknown_agent",
            SwarmError::Bus(_) => "swarm_bus",
            SwarmError::Pidfile { .. } => "swarm_pidfile",
            SwarmError::Workspace { .. } => "swarm_workspace",
            SwarmError::Spawn(_) => "swarm_spawn",
        }
    }
}

/// # Errors produced by message-bus endpoints.
///
/// Transient failures (`Send`, `Connect`) are logged and swallowed by the
/// supervisor, which keeps operating in a degraded, bus-less mode.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// A bus operation was attempted before `connect` succeeded.
    #[error("bus endpoint is not connected")]
    NotConnected,

    /// The hub or transport has shut down.
    #[error("bus is closed")]
    Closed,

    /// Connecting to the transport failed.
    #[error("bus connect failed: {reason}")]
    Connect {
        /// Transport-provided description.
        reason: String,
    },

    /// Sending a message failed.
    #[error("bus send failed: {reason}")]
    Send {
        /// Transport-provided description.
        reason: String,
    },
}

impl BusError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::NotConnected => "bus_not_connected",
            BusError::Closed => "bus_closed",
            BusError::Connect { .. } => "bus_connect_failed",
            BusError::Send { .. } => "bus_send_failed",
        }
    }
}

/// # Errors produced while launching an executor child process.
///
/// A spawn error is converted into a daemon `crashed` event and routes the
/// slot through crash recovery; it is never a normal task outcome.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The executor command is empty.
    #[error("executor command is empty")]
    NoCommand,

    /// The OS refused to spawn the child.
    #[error("failed to spawn executor '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::NoCommand => "spawn_no_command",
            SpawnError::Spawn { .. } => "spawn_failed",
        }
    }
}
