//! # Quota probe: per-agent token accounting and budget thresholds.
//!
//! The [`QuotaProbe`] records token usage per agent and in aggregate.
//! Token counts come from one of three estimation modes, selected at
//! construction:
//!
//! - [`EstimationMode::Reported`]: the caller supplies an explicit positive
//!   count
//! - [`EstimationMode::Output`]: `⌈len(output) / chars_per_token⌉`
//! - [`EstimationMode::Duration`]: `⌈duration_secs · tokens_per_second⌉`
//!
//! If the chosen mode has no input for a record, the probe falls back to
//! the output estimate when output is available, and records zero otherwise.
//!
//! Budget events:
//! - `budget_exhausted` is **level-triggered** and may repeat across records;
//!   it describes the current state.
//! - `budget_warning` is **edge-triggered** behind a latch;
//!   [`set_budget`](QuotaProbe::set_budget) re-arms the latch when the new
//!   utilization drops below the warning threshold.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::events::{Bus, Event, EventKind};

/// How token counts are derived from usage reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimationMode {
    /// Caller reports explicit token counts.
    #[default]
    Reported,
    /// Estimate from output length.
    Output,
    /// Estimate from run duration.
    Duration,
}

/// Probe construction parameters.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Estimation mode for usage records.
    pub mode: EstimationMode,
    /// Aggregate token budget. `0` disables threshold events.
    pub budget: u64,
    /// Fraction of the budget at which the one-shot warning fires.
    pub warning_threshold: f64,
    /// Characters per token for output estimation.
    pub chars_per_token: u32,
    /// Tokens per second for duration estimation.
    pub tokens_per_second: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            mode: EstimationMode::Reported,
            budget: 0,
            warning_threshold: 0.8,
            chars_per_token: 4,
            tokens_per_second: 50,
        }
    }
}

/// One completed-task usage report.
#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    /// Reporting agent.
    pub agent_id: String,
    /// Explicit token count (`Reported` mode).
    pub tokens: Option<u64>,
    /// Executor output (tail suffices; `Output` mode and fallback).
    pub output: Option<String>,
    /// Executor run duration (`Duration` mode).
    pub duration: Option<Duration>,
}

/// Accumulated usage for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentUsage {
    /// Tokens recorded for this agent.
    pub total_tokens: u64,
    /// Number of usage records applied.
    pub tasks: u64,
    /// When the last record was applied.
    pub last_task: Option<SystemTime>,
}

struct QuotaState {
    per_agent: HashMap<String, AgentUsage>,
    total: u64,
    budget: u64,
    warning_emitted: bool,
}

/// Records token usage and emits budget-threshold events.
pub struct QuotaProbe {
    cfg: QuotaConfig,
    bus: Bus,
    state: Mutex<QuotaState>,
}

impl QuotaProbe {
    /// Creates a probe publishing events on `bus`.
    pub fn new(cfg: QuotaConfig, bus: Bus) -> Self {
        let budget = cfg.budget;
        Self {
            cfg,
            bus,
            state: Mutex::new(QuotaState {
                per_agent: HashMap::new(),
                total: 0,
                budget,
                warning_emitted: false,
            }),
        }
    }

    /// Applies a usage report and returns the tokens recorded.
    ///
    /// Publishes `QuotaUsage` for every record, plus `BudgetExhausted` or
    /// `BudgetWarning` when a non-zero budget says so.
    pub fn record(&self, report: &UsageReport) -> u64 {
        let tokens = self.estimate(report);

        let (total, budget, warn_now) = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let agent = state.per_agent.entry(report.agent_id.clone()).or_default();
            agent.total_tokens += tokens;
            agent.tasks += 1;
            agent.last_task = Some(SystemTime::now());
            state.total += tokens;

            let budget = state.budget;
            let mut warn_now = false;
            if budget > 0
                && state.total < budget
                && state.total as f64 >= self.cfg.warning_threshold * budget as f64
                && !state.warning_emitted
            {
                state.warning_emitted = true;
                warn_now = true;
            }
            (state.total, budget, warn_now)
        };

        self.bus.publish(
            Event::now(EventKind::QuotaUsage)
                .with_agent(&report.agent_id)
                .with_tokens(tokens),
        );

        if budget > 0 {
            if total >= budget {
                self.bus.publish(
                    Event::now(EventKind::BudgetExhausted)
                        .with_tokens(total)
                        .with_pct(utilization_pct(total, budget)),
                );
            } else if warn_now {
                self.bus.publish(
                    Event::now(EventKind::BudgetWarning)
                        .with_tokens(total)
                        .with_pct(utilization_pct(total, budget)),
                );
            }
        }

        tokens
    }

    /// Replaces the budget.
    ///
    /// Re-arms the warning latch when the new utilization sits below the
    /// warning threshold (including `new_budget == 0`).
    pub fn set_budget(&self, new_budget: u64) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.budget = new_budget;
        if new_budget == 0
            || (state.total as f64) < self.cfg.warning_threshold * new_budget as f64
        {
            state.warning_emitted = false;
        }
    }

    /// Clears all accumulated state, keeping the configured budget.
    pub fn reset(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.per_agent.clear();
        state.total = 0;
        state.warning_emitted = false;
    }

    /// Aggregate tokens recorded since the last reset.
    pub fn total(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .total
    }

    /// Current budget.
    pub fn budget(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .budget
    }

    /// Accumulated usage for one agent.
    pub fn agent_usage(&self, agent_id: &str) -> Option<AgentUsage> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .per_agent
            .get(agent_id)
            .cloned()
    }

    /// Derives a token count from the report per the configured mode, with
    /// the output fallback.
    fn estimate(&self, report: &UsageReport) -> u64 {
        let from_output = |out: &str| {
            (out.len() as u64).div_ceil(self.cfg.chars_per_token.max(1) as u64)
        };

        let primary = match self.cfg.mode {
            EstimationMode::Reported => report.tokens.filter(|t| *t > 0),
            EstimationMode::Output => report.output.as_deref().map(from_output),
            EstimationMode::Duration => report.duration.map(|d| {
                (d.as_millis() as u64)
                    .saturating_mul(self.cfg.tokens_per_second as u64)
                    .div_ceil(1000)
            }),
        };

        primary
            .or_else(|| report.output.as_deref().map(from_output))
            .unwrap_or(0)
    }
}

fn utilization_pct(total: u64, budget: u64) -> u8 {
    total
        .saturating_mul(100)
        .checked_div(budget)
        .unwrap_or(0)
        .min(u8::MAX as u64) as u8
}
