//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] — the extension point for plugging observers into
//! the swarm's event stream.
//!
//! Each subscriber gets a dedicated worker reading its own broadcast
//! receiver on the [`Bus`](crate::events::Bus). There is no intermediate
//! queue: the bus's bounded ring buffer is the buffer, and a subscriber
//! that cannot keep up lags and skips old events without slowing the
//! control plane or its peers.
//!
//! ## Rules
//! - Panics are caught per event and reported; the worker keeps going
//! - [`wants`](Subscribe::wants) runs before dispatch, so uninterested
//!   subscribers never pay for an event they would ignore
//! - Lag only ever costs the lagging subscriber

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Observer of the swarm's runtime events.
///
/// Implementations should use async I/O and handle their own errors; a
/// panic is isolated and reported as a `SubscriberPanicked` event, but the
/// offending event is lost to this subscriber.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Runs on the subscriber's dedicated worker, in event order. Slow
    /// processing makes this subscriber lag behind the bus, nothing else.
    async fn on_event(&self, event: &Event);

    /// Short name used in lag and panic diagnostics
    /// (e.g. `"log"`, `"metrics"`, `"slack"`).
    fn name(&self) -> &'static str;

    /// Pre-dispatch filter over event kinds.
    ///
    /// Return `false` for kinds this subscriber ignores; the worker then
    /// skips [`on_event`](Self::on_event) entirely. Defaults to everything.
    fn wants(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}
