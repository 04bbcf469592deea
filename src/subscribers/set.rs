//! # Subscriber workers over the event bus.
//!
//! [`SubscriberSet`] holds the registered subscribers and, once the swarm
//! starts, gives each one a worker task that reads straight from its own
//! broadcast receiver on the shared [`Bus`]. The bus's ring buffer is the
//! only queue in the path — there is no per-subscriber channel to size,
//! drain, or shut down.
//!
//! ## Architecture
//! ```text
//! Bus (broadcast, bounded ring)
//!  ├── rx ──► worker ──► wants()? ──► subscriber1.on_event()
//!  ├── rx ──► worker ──► wants()? ──► subscriber2.on_event()
//!  └── rx ──► worker ──► wants()? ──► subscriberN.on_event()
//! ```
//!
//! ## Isolation
//! - A slow subscriber lags its receiver; the bus drops its oldest events
//!   and the worker reports the skip as a `SubscriberOverflow`. Peers and
//!   publishers never notice.
//! - A panicking subscriber loses that one event; the panic is caught,
//!   logged, and reported as `SubscriberPanicked`.
//! - Diagnostics triggered *by* diagnostic events are logged but not
//!   re-published, so a subscriber that chokes on its own failure reports
//!   cannot start an event storm.
//!
//! Workers exit when the runtime token fires or the bus closes.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

/// Registered subscribers plus the bus they observe.
pub struct SubscriberSet {
    subscribers: Vec<Arc<dyn Subscribe>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the set. Workers are spawned per run via
    /// [`spawn_workers`](Self::spawn_workers), not here.
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        Self { subscribers, bus }
    }

    /// Spawns one worker per subscriber, scoped to `runtime_token`.
    ///
    /// Safe to call once per supervisor run; each worker holds a fresh
    /// broadcast receiver and dies with the token.
    pub fn spawn_workers(&self, runtime_token: &CancellationToken) {
        for sub in &self.subscribers {
            let mut rx = self.bus.subscribe();
            let bus = self.bus.clone();
            let sub = Arc::clone(sub);
            let token = runtime_token.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        ev = rx.recv() => match ev {
                            Ok(ev) => {
                                if sub.wants(ev.kind) {
                                    dispatch(sub.as_ref(), &ev, &bus).await;
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(
                                    event = "subscriber_lagged",
                                    subscriber = sub.name(),
                                    skipped
                                );
                                bus.publish(Event::subscriber_overflow(sub.name(), skipped));
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            });
        }
    }
}

/// Runs one event through a subscriber with panic isolation.
async fn dispatch(sub: &dyn Subscribe, ev: &Event, bus: &Bus) {
    let guarded = std::panic::AssertUnwindSafe(sub.on_event(ev));
    if let Err(payload) = guarded.catch_unwind().await {
        let info = panic_text(payload.as_ref());
        warn!(event = "subscriber_panicked", subscriber = sub.name(), info = %info);

        // Panics on ordinary events are worth broadcasting; panics on
        // diagnostic events are not, or a broken subscriber would feed
        // itself forever.
        if !ev.is_subscriber_overflow() && !ev.is_subscriber_panic() {
            bus.publish(Event::subscriber_panicked(sub.name(), info));
        }
    }
}

/// Best-effort rendering of a panic payload.
fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
