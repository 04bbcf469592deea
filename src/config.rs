//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the swarm supervisor.
//!
//! Config is consumed in two places:
//! 1. **Supervisor construction**: `SupervisorBuilder::new(config)`
//! 2. **Daemon defaults**: heartbeat cadence, executor command, task watchdog
//!
//! ## Sentinel values
//! - `token_budget = 0` → budget gating disabled
//! - `max_active = 0` → no promoted executors are ever admitted
//!
//! Prefer the helper accessors over sprinkling sentinel checks across call
//! sites.

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the swarm supervisor.
///
/// ## Field semantics
/// - `count`: initial fleet size (idle daemons spawned on `start`)
/// - `max_active`: admission cap for concurrently promoted executors
/// - `role`: default role for spawned daemons
/// - `channels`: bus channels joined on connect
/// - `token_budget`: aggregate token ceiling (`0` = disabled)
/// - `heartbeat_interval`: idle heartbeat cadence, also the health miss unit
/// - `miss_threshold`: missed heartbeats before an agent is declared dead
/// - `max_task_duration`: executor watchdog; exceeded runs are terminated
/// - `persist`: keep workspaces on shutdown and scale-down
/// - `shutdown_timeout`: graceful-stop deadline for executors
#[derive(Clone, Debug)]
pub struct Config {
    /// Initial fleet size.
    pub count: usize,

    /// Maximum number of concurrently promoted executors.
    pub max_active: usize,

    /// Default daemon role (`"general"` claims any task).
    pub role: String,

    /// Channels joined on the message bus.
    pub channels: Vec<String>,

    /// Aggregate token budget. `0` disables budget gating.
    pub token_budget: u64,

    /// Idle heartbeat cadence and health-check miss unit.
    pub heartbeat_interval: Duration,

    /// Missed heartbeats before an agent is escalated to `dead`.
    pub miss_threshold: u32,

    /// Executor watchdog: runs exceeding this are terminated and treated as
    /// a normal failed exit.
    pub max_task_duration: Duration,

    /// Keep workspaces on shutdown and scale-down.
    pub persist: bool,

    /// Pidfile path holding the supervisor lock.
    pub pidfile: PathBuf,

    /// Directory for log files.
    pub log_dir: PathBuf,

    /// Root directory under which per-daemon workspaces are provisioned.
    pub workspace_root: PathBuf,

    /// Maximum wait for executors to exit during `stop`.
    pub shutdown_timeout: Duration,

    /// Capacity of the internal event-bus ring buffer.
    pub bus_capacity: usize,

    /// Executor command: program plus prefix arguments. The daemon appends
    /// the task prompt, working directory, and identity name.
    pub executor_cmd: Vec<String>,

    /// Optional resident-memory alert limit per executor, in MiB.
    pub memory_limit_mb: Option<u64>,

    /// Optional CPU-usage alert limit per executor, in percent.
    pub cpu_limit_pct: Option<f64>,
}

impl Config {
    /// Returns the token budget as an `Option`.
    ///
    /// - `None` → budget gating disabled
    /// - `Some(n)` → promotions pause once usage reaches `n`
    #[inline]
    pub fn budget(&self) -> Option<u64> {
        if self.token_budget == 0 {
            None
        } else {
            Some(self.token_budget)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Splits the executor command into program and prefix arguments.
    ///
    /// Returns `None` when the command is empty.
    pub fn executor_command(&self) -> Option<(&str, &[String])> {
        self.executor_cmd
            .split_first()
            .map(|(prog, rest)| (prog.as_str(), rest))
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `count = 3`, `max_active = 5`, `role = "builder"`
    /// - `channels = ["#agents"]`
    /// - `token_budget = 0` (disabled), `warning_threshold = 0.8`
    /// - `heartbeat_interval = 30s`, `miss_threshold = 3`
    /// - `max_task_duration = 30min`, `shutdown_timeout = 10s`
    /// - `pidfile = ~/.swarmvisor/swarm.pid`, `log_dir = ~/.swarmvisor/logs`,
    ///   `workspace_root = ~/.swarmvisor/workspaces`
    /// - `bus_capacity = 1024`, `executor_cmd = ["claude"]`
    fn default() -> Self {
        let home = home_dir();
        Self {
            count: 3,
            max_active: 5,
            role: "builder".to_string(),
            channels: vec!["#agents".to_string()],
            token_budget: 0,
            heartbeat_interval: Duration::from_secs(30),
            miss_threshold: 3,
            max_task_duration: Duration::from_secs(30 * 60),
            persist: false,
            pidfile: home.join(".swarmvisor").join("swarm.pid"),
            log_dir: home.join(".swarmvisor").join("logs"),
            workspace_root: home.join(".swarmvisor").join("workspaces"),
            shutdown_timeout: Duration::from_secs(10),
            bus_capacity: 1024,
            executor_cmd: vec!["claude".to_string()],
            memory_limit_mb: None,
            cpu_limit_pct: None,
        }
    }
}

/// Best-effort home directory; falls back to the current directory.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_disables_gating() {
        let cfg = Config::default();
        assert_eq!(cfg.budget(), None);

        let cfg = Config {
            token_budget: 100,
            ..Config::default()
        };
        assert_eq!(cfg.budget(), Some(100));
    }

    #[test]
    fn executor_command_splits_program_and_prefix() {
        let cfg = Config {
            executor_cmd: vec!["claude".into(), "--dangerously".into()],
            ..Config::default()
        };
        let (prog, rest) = cfg.executor_command().unwrap();
        assert_eq!(prog, "claude");
        assert_eq!(rest, ["--dangerously".to_string()]);

        let cfg = Config {
            executor_cmd: vec![],
            ..Config::default()
        };
        assert!(cfg.executor_command().is_none());
    }
}
