//! # Daemon: per-slot state machine and executor plumbing.
//!
//! A daemon is the long-lived control process for one fleet slot. It idles
//! on the message bus, claims or accepts tasks, and — with supervisor
//! approval — promotes itself into a short-lived executor child process.
//!
//! ## Contents
//! - [`Daemon`], [`DaemonConfig`], [`DaemonInfo`] the state machine
//! - [`DaemonState`] the five-state lifecycle
//! - [`ExecutorSpawner`], [`ProcessSpawner`], [`ExecutorHandle`] the spawn seam
//!
//! The supervisor consumes daemon events from the shared
//! [`Bus`](crate::events::Bus); daemons never talk to the message bus
//! directly (the supervisor bridges).

#[allow(clippy::module_inception)]
mod daemon;
mod executor;
mod state;

pub use daemon::{Daemon, DaemonConfig, DaemonInfo};
pub use executor::{ExecSpec, ExecutorHandle, ExecutorSpawner, ExitOutcome, OutputChunk, ProcessSpawner};
pub use state::DaemonState;
