//! # Event subscribers for the swarm runtime.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! that runs one worker per subscriber directly over the event bus.
//!
//! ## Architecture
//! ```text
//! Daemon/Probe ── publish(Event) ──► Bus (broadcast, bounded ring)
//!                                     ├──► supervisor listener
//!                                     ├──► worker ──► LogWriter
//!                                     └──► worker ──► custom…
//! ```
//!
//! Every worker owns its own broadcast receiver, so the bus's ring buffer
//! is the only queue: slow subscribers lag and skip, panicking subscribers
//! lose one event, and neither touches the control plane.

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
