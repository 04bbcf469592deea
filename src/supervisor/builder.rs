//! # Supervisor construction.
//!
//! [`SupervisorBuilder`] wires the runtime pieces together: event bus,
//! subscriber workers, health monitor, and the optional collaborators
//! (agent bus, quota probe, custom workspace provider or executor spawner).

use std::sync::Arc;

use crate::bus::AgentBus;
use crate::config::Config;
use crate::daemon::{ExecutorSpawner, ProcessSpawner};
use crate::events::Bus;
use crate::health::{HealthConfig, HealthMonitor};
use crate::policies::RecoveryPolicy;
use crate::quota::{QuotaConfig, QuotaProbe};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::supervisor::supervisor::Supervisor;
use crate::workspace::{LocalWorkspaces, WorkspaceProvider};

/// Builder for a [`Supervisor`] with optional collaborators.
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    agent_bus: Option<Arc<dyn AgentBus>>,
    quota: Option<QuotaConfig>,
    workspaces: Option<Arc<dyn WorkspaceProvider>>,
    spawner: Option<Arc<dyn ExecutorSpawner>>,
    recovery: RecoveryPolicy,
}

impl SupervisorBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            agent_bus: None,
            quota: None,
            workspaces: None,
            spawner: None,
            recovery: RecoveryPolicy::default(),
        }
    }

    /// Sets event subscribers for observability.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Attaches a message bus endpoint.
    ///
    /// Without one the swarm runs bus-less: daemons are driven through
    /// `broadcast_task`/`assign_task` only.
    pub fn with_bus(mut self, bus: Arc<dyn AgentBus>) -> Self {
        self.agent_bus = Some(bus);
        self
    }

    /// Attaches a quota probe with the given accounting configuration.
    ///
    /// The probe's budget gates promotions once exhausted.
    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Replaces the workspace provider (default: [`LocalWorkspaces`] under
    /// the configured root).
    pub fn with_workspaces(mut self, workspaces: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspaces = Some(workspaces);
        self
    }

    /// Replaces the executor spawner (default: [`ProcessSpawner`]).
    pub fn with_spawner(mut self, spawner: Arc<dyn ExecutorSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Replaces the crash-recovery policy.
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Builds the supervisor and its runtime components.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        let health = Arc::new(HealthMonitor::new(
            HealthConfig {
                heartbeat_interval: self.cfg.heartbeat_interval,
                miss_threshold: self.cfg.miss_threshold,
                memory_limit_mb: self.cfg.memory_limit_mb,
                cpu_limit_pct: self.cfg.cpu_limit_pct,
            },
            bus.clone(),
        ));

        let quota = self
            .quota
            .map(|cfg| Arc::new(QuotaProbe::new(cfg, bus.clone())));

        let workspaces = self
            .workspaces
            .unwrap_or_else(|| Arc::new(LocalWorkspaces::new(self.cfg.workspace_root.clone())));

        let spawner = self.spawner.unwrap_or_else(|| Arc::new(ProcessSpawner));

        Arc::new(Supervisor::new_internal(
            self.cfg, bus, subs, self.agent_bus, workspaces, spawner, health, quota, self.recovery,
        ))
    }
}
