//! # Supervisor control plane.
//!
//! This module contains the composition root of the crate. The only public
//! entry points are [`Supervisor`] and [`SupervisorBuilder`]; everything
//! else is an internal building block.
//!
//! ## Files & responsibilities
//! - **supervisor.rs**: the control plane; owns the process table, admission
//!   controller, crash recovery, scaling, bus routing, and lifecycle.
//! - **builder.rs**: wires config, subscribers, and optional collaborators.
//! - **table.rs**: process-table entries (restart bookkeeping per slot).
//! - **admission.rs**: the FIFO promotion queue.
//! - **status.rs**: read-only projections (`status()`, scale reports,
//!   config patches).
//!
//! ## Wiring (module-level flow)
//! ```text
//! Application code
//!   └─ SupervisorBuilder::new(config)
//!        .with_bus(...)          optional message-bus endpoint
//!        .with_quota(...)        optional token accounting
//!        .with_subscribers(...)  observability sinks
//!        .build() → Arc<Supervisor>
//!
//! Supervisor::start()
//!   ├─ acquire pidfile (stale takeover, AlreadyRunning on live holder)
//!   ├─ spawn event listener + subscriber workers
//!   ├─ connect bus, join channels, spawn router     (degrades gracefully)
//!   ├─ spawn `count` daemons (workspace + identity each)
//!   └─ spawn health ticker
//!
//! Inbound task flow
//!   bus → router → Daemon::handle_message → PromoteRequested
//!     → admission: pause? deny · cap? queue · budget? pause+deny · approve
//!     → Daemon::approve_promotion → executor → TaskDone/TaskFail → Demoted
//!     → queue drain
//! ```

mod admission;
mod builder;
mod status;
#[allow(clippy::module_inception)]
mod supervisor;
mod table;

pub use builder::SupervisorBuilder;
pub use status::{AgentStatus, ConfigPatch, ScaleReport, SwarmStatus};
pub use supervisor::Supervisor;
