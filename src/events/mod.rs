//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by daemons, the health
//! monitor, the quota probe, and the supervisor itself.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Daemon`, `HealthMonitor`, `QuotaProbe`, `Supervisor`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the supervisor's listener (admission, counters, crash
//!   recovery, bridging to the agent bus) and every attached
//!   [`Subscribe`](crate::subscribers::Subscribe) implementation.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
