//! # In-process bus: many endpoints, one hub.
//!
//! [`LocalHub`] multiplexes any number of [`LocalEndpoint`]s through shared
//! state. Delivery filters by channel membership or direct-address match and
//! suppresses the sender's echo. All sends serialize through the hub lock,
//! which gives per-sender FIFO (and in fact global) ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::message::BusMessage;
use super::traits::{AgentBus, BusNotice};
use crate::error::BusError;

/// Delivery capacity per endpoint inbox.
const INBOX_CAPACITY: usize = 256;

/// Per-endpoint registration inside the hub.
struct EndpointSlot {
    channels: HashSet<String>,
    tx: broadcast::Sender<BusMessage>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, EndpointSlot>,
}

/// Shared hub for in-process bus endpoints.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an endpoint handle for `agent_id`.
    ///
    /// The endpoint is inert until [`AgentBus::connect`] is called on it.
    pub fn endpoint(&self, agent_id: impl Into<String>) -> LocalEndpoint {
        let (inbox_tx, _) = broadcast::channel(INBOX_CAPACITY);
        let (notice_tx, _) = broadcast::channel(16);
        LocalEndpoint {
            state: Arc::clone(&self.state),
            agent_id: agent_id.into(),
            inbox_tx,
            notice_tx,
        }
    }
}

/// One participant on a [`LocalHub`].
pub struct LocalEndpoint {
    state: Arc<Mutex<HubState>>,
    agent_id: String,
    inbox_tx: broadcast::Sender<BusMessage>,
    notice_tx: broadcast::Sender<BusNotice>,
}

impl LocalEndpoint {
    /// Returns this endpoint's agent id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[async_trait]
impl AgentBus for LocalEndpoint {
    async fn connect(&self) -> Result<String, BusError> {
        let mut state = self.state.lock().await;
        state
            .endpoints
            .entry(self.agent_id.clone())
            .or_insert_with(|| EndpointSlot {
                channels: HashSet::new(),
                tx: self.inbox_tx.clone(),
            });
        Ok(self.agent_id.clone())
    }

    async fn join(&self, channel: &str) -> Result<(), BusError> {
        let channel = channel.trim_start_matches('#');
        let mut state = self.state.lock().await;
        let slot = state
            .endpoints
            .get_mut(&self.agent_id)
            .ok_or(BusError::NotConnected)?;
        slot.channels.insert(channel.to_string());
        Ok(())
    }

    async fn send(&self, to: &str, content: &str) -> Result<(), BusError> {
        let state = self.state.lock().await;
        if !state.endpoints.contains_key(&self.agent_id) {
            return Err(BusError::NotConnected);
        }

        let msg = BusMessage::new(self.agent_id.clone(), to, content);
        if let Some(channel) = msg.channel() {
            for (id, slot) in &state.endpoints {
                if id != &self.agent_id && slot.channels.contains(channel) {
                    let _ = slot.tx.send(msg.clone());
                }
            }
            Ok(())
        } else if let Some(target) = msg.direct() {
            // Direct messages to unknown agents vanish, matching a remote
            // transport where the peer may have gone away.
            if let Some(slot) = state.endpoints.get(target) {
                let _ = slot.tx.send(msg.clone());
            }
            Ok(())
        } else {
            Err(BusError::Send {
                reason: format!("target '{to}' is neither #channel nor @agentId"),
            })
        }
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        state.endpoints.remove(&self.agent_id);
        Ok(())
    }

    fn inbox(&self) -> broadcast::Receiver<BusMessage> {
        self.inbox_tx.subscribe()
    }

    fn notices(&self) -> broadcast::Receiver<BusNotice> {
        self.notice_tx.subscribe()
    }
}
