//! # swarmvisor
//!
//! **Swarmvisor** supervises a fleet of long-lived agent daemons that idle
//! on a shared message bus until they claim a unit of work, then promote
//! themselves into a short-lived executor child process.
//!
//! The supervisor preserves an invariant fleet size, bounds the number of
//! concurrently promoted executors, enforces a global token budget,
//! restarts crashed slots with bounded backoff, and disposes of per-daemon
//! workspaces on shutdown.
//!
//! ## Features
//!
//! | Area               | Description                                                         | Key types / traits                       |
//! |--------------------|---------------------------------------------------------------------|------------------------------------------|
//! | **Supervision**    | Process table, promotion admission, crash recovery, scaling.        | [`Supervisor`], [`SupervisorBuilder`]    |
//! | **Daemons**        | Per-slot state machine owning at most one executor.                 | [`Daemon`], [`DaemonState`]              |
//! | **Message bus**    | Pub/sub capability over channels and direct addresses.              | [`AgentBus`], [`LocalHub`], [`Directive`]|
//! | **Health**         | Heartbeat freshness, miss escalation, resource sampling.            | [`HealthMonitor`]                        |
//! | **Quota**          | Token accounting with budget warning/exhaustion thresholds.         | [`QuotaProbe`]                           |
//! | **Events**         | Typed lifecycle events fanned out to subscribers.                   | [`Event`], [`EventKind`], [`Subscribe`]  |
//! | **Errors**         | Typed errors with stable log labels.                                | [`SwarmError`], [`BusError`]             |
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarmvisor::{Config, LocalHub, LogWriter, SupervisorBuilder, TaskBrief};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.count = 3;
//!     cfg.max_active = 2;
//!     cfg.executor_cmd = vec!["claude".into(), "--print".into()];
//!
//!     let hub = LocalHub::new();
//!     let supervisor = SupervisorBuilder::new(cfg)
//!         .with_bus(Arc::new(hub.endpoint("supervisor")))
//!         .with_subscribers(vec![Arc::new(LogWriter)])
//!         .build();
//!
//!     supervisor.start().await?;
//!     supervisor.broadcast_task(TaskBrief::for_role("builder")).await?;
//!     // ...
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod bus;
mod config;
mod daemon;
mod error;
mod events;
mod health;
mod pidfile;
mod policies;
mod quota;
mod subscribers;
mod supervisor;
mod workspace;

// ---- Public re-exports ----

pub use bus::{AgentBus, BusMessage, BusNotice, Directive, LocalEndpoint, LocalHub, TaskBrief};
pub use config::Config;
pub use daemon::{
    Daemon, DaemonConfig, DaemonInfo, DaemonState, ExecSpec, ExecutorHandle, ExecutorSpawner,
    ExitOutcome, OutputChunk, ProcessSpawner,
};
pub use error::{BusError, SpawnError, SwarmError};
pub use events::{Bus, Event, EventKind};
pub use health::{HealthConfig, HealthMonitor, HealthSnapshot, HealthStatus, HealthSummary};
pub use pidfile::Pidfile;
pub use policies::{RecoveryDecision, RecoveryPolicy};
pub use quota::{AgentUsage, EstimationMode, QuotaConfig, QuotaProbe, UsageReport};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use supervisor::{
    AgentStatus, ConfigPatch, ScaleReport, SupervisorBuilder, SwarmStatus, Supervisor,
};
pub use workspace::{AgentIdentity, LocalWorkspaces, Workspace, WorkspaceProvider};
