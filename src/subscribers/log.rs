//! # Logging subscriber.
//!
//! [`LogWriter`] renders runtime events through `tracing`, one line per
//! event with structured fields. It is the default observability sink;
//! implement a custom [`Subscribe`](crate::subscribers::Subscribe) for
//! metrics or alert routing.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Structured-log subscriber backed by `tracing`.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let agent = e.agent.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::DaemonStarted => {
                info!(event = "daemon_started", agent, name = e.name.as_deref());
            }
            EventKind::DaemonStopped => {
                info!(event = "daemon_stopped", agent);
            }
            EventKind::Heartbeat => {
                debug!(event = "heartbeat", agent);
            }
            EventKind::Claim => {
                info!(event = "claim", agent, component = e.task.as_ref().and_then(|t| t.component.as_deref()));
            }
            EventKind::PromoteRequested => {
                info!(event = "promote_requested", agent);
            }
            EventKind::Promoted => {
                info!(event = "promoted", agent, pid = e.pid);
            }
            EventKind::Unclaim => {
                info!(event = "unclaim", agent, reason = e.reason.as_deref());
            }
            EventKind::ExecutorOutput => {
                debug!(event = "executor_output", agent, stream = e.stream.as_deref());
            }
            EventKind::TaskDone => {
                info!(event = "task_done", agent, duration = ?e.duration);
            }
            EventKind::TaskFail => {
                warn!(
                    event = "task_fail",
                    agent,
                    exit_code = e.exit_code,
                    error = e.error.as_deref()
                );
            }
            EventKind::Demoted => {
                info!(event = "demoted", agent);
            }
            EventKind::DaemonCrashed => {
                warn!(event = "daemon_crashed", agent, error = e.error.as_deref());
            }
            EventKind::SwarmStarted => {
                info!(event = "swarm_started", count = e.count);
            }
            EventKind::SwarmStopped => {
                info!(event = "swarm_stopped");
            }
            EventKind::PromotionsPaused => {
                warn!(event = "promotions_paused", reason = e.reason.as_deref());
            }
            EventKind::AgentDegraded => {
                warn!(event = "agent_degraded", agent, error = e.error.as_deref());
            }
            EventKind::RestartScheduled => {
                info!(event = "agent_restart_scheduled", agent, delay = ?e.delay);
            }
            EventKind::AgentRestarted => {
                info!(event = "agent_restarted", agent, name = e.name.as_deref());
            }
            EventKind::ScaledUp => {
                info!(event = "scaled_up", count = e.count);
            }
            EventKind::ScaledDown => {
                info!(event = "scaled_down", count = e.count);
            }
            EventKind::HealthAlert => {
                warn!(event = "health_alert", agent, reason = e.reason.as_deref());
            }
            EventKind::QuotaUsage => {
                debug!(event = "quota_usage", agent, tokens = e.tokens);
            }
            EventKind::BudgetWarning => {
                warn!(event = "budget_warning", pct = e.pct);
            }
            EventKind::BudgetExhausted => {
                warn!(event = "budget_exhausted", tokens = e.tokens);
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                warn!(
                    event = "subscriber_trouble",
                    subscriber = e.name.as_deref(),
                    skipped = e.count,
                    error = e.error.as_deref()
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
