//! # Bus capability trait.
//!
//! [`AgentBus`] is the seam between the supervisor and whatever transport
//! carries swarm traffic. Implementations are interchangeable: the
//! in-process [`LocalHub`](super::LocalHub) for tests and single-machine
//! runs, or a remote wire client elsewhere.
//!
//! Inbound delivery uses broadcast receivers rather than callbacks so a
//! consumer can subscribe, drop, and re-subscribe without holding a lock on
//! the endpoint.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::message::BusMessage;
use crate::error::BusError;

/// Out-of-band transport signals.
///
/// Errors and unexpected disconnects surface here instead of through the
/// message inbox; the supervisor logs them and keeps running without the
/// bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusNotice {
    /// The transport dropped the connection.
    Disconnected {
        /// Transport-provided reason, if any.
        reason: String,
    },
    /// A transport-level error that did not kill the connection.
    Error {
        /// Description of the failure.
        detail: String,
    },
}

/// Capability to participate on the shared message bus.
///
/// ## Contracts
/// - `connect` yields the endpoint's agent id (assigned or confirmed by the
///   transport) and is required before any other operation.
/// - `join` is idempotent and only affects delivery of `#channel` targets.
/// - `send` fails with [`BusError::NotConnected`] before `connect`.
/// - Channel messages are never echoed back to their sender.
/// - Direct messages reach only the endpoint owning the target agent id.
#[async_trait]
pub trait AgentBus: Send + Sync {
    /// Connects the endpoint, returning its agent id.
    async fn connect(&self) -> Result<String, BusError>;

    /// Joins a channel. Idempotent.
    async fn join(&self, channel: &str) -> Result<(), BusError>;

    /// Sends `content` to `#channel` or `@agentId`.
    async fn send(&self, to: &str, content: &str) -> Result<(), BusError>;

    /// Disconnects the endpoint. Idempotent.
    async fn disconnect(&self) -> Result<(), BusError>;

    /// Subscribes to inbound messages.
    fn inbox(&self) -> broadcast::Receiver<BusMessage>;

    /// Subscribes to transport notices (errors, unexpected disconnects).
    fn notices(&self) -> broadcast::Receiver<BusNotice>;
}
