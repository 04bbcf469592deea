//! # Runtime events emitted by daemons, the supervisor, and the probes.
//!
//! The [`EventKind`] enum classifies events across five areas:
//! - **Daemon lifecycle**: the idle → promoting → active → demoting cycle
//!   plus the crashed terminal branch
//! - **Supervisor**: swarm start/stop, scaling, crash-recovery milestones
//! - **Health**: advisory alerts from the heartbeat monitor
//! - **Quota**: token accounting and budget thresholds
//! - **Subscriber plumbing**: lag and panic reports from subscriber workers
//!
//! The [`Event`] struct carries optional metadata (agent id, task, error,
//! pid, output chunk, ...) attached through `with_*` builders.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can order events correctly even when they are
//! delivered through independent async channels.
//!
//! ## Per-daemon flow
//! ```text
//! DaemonStarted
//!   → Heartbeat*                  (while idle)
//!   → Claim?                      (volunteering for an announcement)
//!   → PromoteRequested
//!   → Promoted | Unclaim          (admission verdict)
//!   → ExecutorOutput*
//!   → TaskDone | TaskFail
//!   → Demoted
//!   → Heartbeat* ...
//! DaemonCrashed ends the cycle; the supervisor replaces the slot.
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::bus::TaskBrief;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber plumbing ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// A lagging subscriber skipped events it could not keep up with.
    SubscriberOverflow,

    // === Daemon lifecycle ===
    /// Daemon came up and entered `idle`.
    DaemonStarted,
    /// Daemon shut down.
    DaemonStopped,
    /// Idle liveness beacon.
    Heartbeat,
    /// Idle daemon volunteers for an announced task.
    Claim,
    /// Daemon entered `promoting` and asks for admission.
    PromoteRequested,
    /// Admission granted; the executor is running.
    Promoted,
    /// Admission denied; the daemon returned to `idle`.
    Unclaim,
    /// A chunk of executor stdout/stderr.
    ExecutorOutput,
    /// Executor exited cleanly.
    TaskDone,
    /// Executor exited with a failure (non-zero, killed, or watchdog).
    TaskFail,
    /// Daemon returned to `idle` after an executor exit.
    Demoted,
    /// Executor spawn error or irrecoverable runtime error.
    DaemonCrashed,

    // === Supervisor ===
    /// The swarm finished starting.
    SwarmStarted,
    /// The swarm stopped.
    SwarmStopped,
    /// Promotion gating engaged (budget/quota).
    PromotionsPaused,
    /// A slot crashed too often inside the degradation window; no further
    /// restarts are scheduled for it.
    AgentDegraded,
    /// A crash-recovery restart was scheduled after backoff.
    RestartScheduled,
    /// A crashed slot was replaced by a fresh daemon.
    AgentRestarted,
    /// Fleet grew.
    ScaledUp,
    /// Fleet shrank.
    ScaledDown,

    // === Health ===
    /// Advisory alert from the health monitor (`reason` carries the cause).
    HealthAlert,

    // === Quota ===
    /// A usage record was applied.
    QuotaUsage,
    /// Aggregate usage crossed the warning threshold (one-shot).
    BudgetWarning,
    /// Aggregate usage reached the budget (level-triggered).
    BudgetExhausted,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number (monotonically increasing)
/// - `at`: wall-clock timestamp (may go backwards, use for logging only)
/// - `kind`: event classification
/// - everything else: optional metadata, populated per kind
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Agent id, if the event concerns one daemon.
    pub agent: Option<String>,
    /// Human-readable daemon name (`swarm-<role>-<NNN>`).
    pub name: Option<String>,
    /// Task attached to the event.
    pub task: Option<TaskBrief>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Short machine-readable cause (`unresponsive`, `memory_limit`, ...).
    pub reason: Option<String>,
    /// OS pid (executor on `Promoted`, sampled process on health alerts).
    pub pid: Option<u32>,
    /// Executor exit code.
    pub exit_code: Option<i32>,
    /// Stream name for output chunks (`stdout`/`stderr`).
    pub stream: Option<String>,
    /// Output chunk or retained output tail.
    pub chunk: Option<String>,
    /// Backoff delay before a scheduled restart.
    pub delay: Option<Duration>,
    /// Executor run duration.
    pub duration: Option<Duration>,
    /// Token count for quota events.
    pub tokens: Option<u64>,
    /// Budget utilization percentage for quota events.
    pub pct: Option<u8>,
    /// Generic count (fleet size, scale deltas).
    pub count: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            agent: None,
            name: None,
            task: None,
            error: None,
            reason: None,
            pid: None,
            exit_code: None,
            stream: None,
            chunk: None,
            delay: None,
            duration: None,
            tokens: None,
            pct: None,
            count: None,
        }
    }

    /// Attaches an agent id.
    pub fn with_agent(mut self, id: impl Into<String>) -> Self {
        self.agent = Some(id.into());
        self
    }

    /// Attaches a daemon name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a task.
    pub fn with_task(mut self, task: TaskBrief) -> Self {
        self.task = Some(task);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a machine-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an OS pid.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an executor exit code.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches an output chunk tagged with its stream.
    pub fn with_chunk(mut self, stream: impl Into<String>, chunk: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self.chunk = Some(chunk.into());
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches a run duration.
    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration = Some(d);
        self
    }

    /// Attaches a token count.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Attaches a budget utilization percentage.
    pub fn with_pct(mut self, pct: u8) -> Self {
        self.pct = Some(pct);
        self
    }

    /// Attaches a generic count.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Creates a subscriber overflow event: `skipped` events were dropped
    /// for a lagging subscriber.
    pub fn subscriber_overflow(subscriber: &'static str, skipped: u64) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_name(subscriber)
            .with_count(skipped as usize)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_name(subscriber)
            .with_error(info)
    }

    /// True for `SubscriberOverflow`.
    pub fn is_subscriber_overflow(&self) -> bool {
        self.kind == EventKind::SubscriberOverflow
    }

    /// True for `SubscriberPanicked`.
    pub fn is_subscriber_panic(&self) -> bool {
        self.kind == EventKind::SubscriberPanicked
    }
}
