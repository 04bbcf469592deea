//! # Agent message bus: envelope, structured directives, and transports.
//!
//! This module groups the **shared bus** the swarm coordinates over. It is
//! distinct from the internal event plane ([`crate::events`]): the event bus
//! carries typed lifecycle events inside one process, while the agent bus
//! carries JSON envelopes between peers that may live anywhere.
//!
//! ## Contents
//! - [`BusMessage`] wire envelope `{type, from, to, content, ts}`
//! - [`Directive`], [`TaskBrief`] structured records carried in `content`
//! - [`AgentBus`] capability trait (connect/join/send/disconnect + sinks)
//! - [`LocalHub`] in-process implementation multiplexing many endpoints
//!
//! ## Addressing
//! `to` is either `#channel` (fan-out to joined members) or `@agentId`
//! (delivered only to the owning endpoint). A sender never receives its own
//! channel messages back.
//!
//! Remote transports (e.g. a WebSocket client) implement [`AgentBus`] outside
//! this crate; nothing in the trait leaks transport identifiers.

mod local;
mod message;
mod traits;

pub use local::{LocalEndpoint, LocalHub};
pub use message::{BusMessage, Directive, TaskBrief};
pub use traits::{AgentBus, BusNotice};
