//! # Daemon: the per-slot state machine.
//!
//! A daemon idles on the bus until a task reaches it, asks the supervisor
//! for permission to promote, and — once approved — owns exactly one
//! executor child until it exits. The strict contract: **no executor starts
//! without supervisor approval** ([`approve_promotion`]).
//!
//! ## Event flow per task
//! ```text
//! handle_message(ASSIGN @self)   → state=promoting → PromoteRequested
//! approve_promotion(task)        → spawn executor  → Promoted{pid}
//!   (or deny_promotion(reason)   → state=idle      → Unclaim)
//! executor output                → ExecutorOutput*
//! executor exit                  → state=demoting  → TaskDone | TaskFail
//!                                → state=idle      → Demoted
//! spawn/runtime error            → TaskFail → DaemonCrashed, state=crashed
//! ```
//!
//! ## Rules
//! - Heartbeats run while idle and promoting; they stop on spawn and resume
//!   on demotion.
//! - Context records (`context.txt` in the workspace) are written on
//!   promote, demote, and crash; failures are swallowed.
//! - The watchdog kills executors that outlive `max_task_duration`; the
//!   kill is reported as a normal failed exit, not a crash.
//!
//! [`approve_promotion`]: Daemon::approve_promotion

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{Directive, TaskBrief};
use crate::daemon::executor::{ExecSpec, ExecutorHandle, ExecutorSpawner, ExitOutcome};
use crate::daemon::state::DaemonState;
use crate::error::SwarmError;
use crate::events::{Bus, Event, EventKind};
use crate::workspace::{self, Workspace};

/// Retained output tail for completion records.
const OUTPUT_TAIL_CHARS: usize = 2000;

/// Per-daemon settings, derived from the supervisor [`Config`](crate::Config).
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Idle heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Executor watchdog.
    pub max_task_duration: Duration,
    /// Executor command: program plus prefix arguments.
    pub executor_cmd: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_task_duration: Duration::from_secs(30 * 60),
            executor_cmd: vec!["claude".to_string()],
        }
    }
}

/// Read-only snapshot of a daemon.
#[derive(Debug, Clone)]
pub struct DaemonInfo {
    /// Stable agent id.
    pub agent_id: String,
    /// Human name (`swarm-<role>-<NNN>`).
    pub name: String,
    /// Role served by this daemon.
    pub role: String,
    /// Current state.
    pub state: DaemonState,
    /// Task attached while not idle.
    pub current_task: Option<TaskBrief>,
    /// Executor pid while active.
    pub executor_pid: Option<u32>,
}

struct DaemonInner {
    state: DaemonState,
    current_task: Option<TaskBrief>,
    executor_pid: Option<u32>,
    executor_kill: Option<CancellationToken>,
    heartbeat_token: Option<CancellationToken>,
}

/// One supervised slot. Owns at most one executor process.
pub struct Daemon {
    workspace: Workspace,
    cfg: DaemonConfig,
    bus: Bus,
    spawner: Arc<dyn ExecutorSpawner>,
    token: CancellationToken,
    inner: Mutex<DaemonInner>,
}

impl Daemon {
    /// Creates a daemon over a provisioned workspace.
    ///
    /// `parent_token` scopes the daemon to the supervisor's run; cancelling
    /// it stops heartbeats and terminates any executor.
    pub fn new(
        workspace: Workspace,
        cfg: DaemonConfig,
        bus: Bus,
        spawner: Arc<dyn ExecutorSpawner>,
        parent_token: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            cfg,
            bus,
            spawner,
            token: parent_token.child_token(),
            inner: Mutex::new(DaemonInner {
                state: DaemonState::Idle,
                current_task: None,
                executor_pid: None,
                executor_kill: None,
                heartbeat_token: None,
            }),
        })
    }

    /// Stable agent id.
    pub fn agent_id(&self) -> &str {
        &self.workspace.identity.agent_id
    }

    /// Human name.
    pub fn name(&self) -> &str {
        &self.workspace.identity.name
    }

    /// Role served by this daemon.
    pub fn role(&self) -> &str {
        &self.workspace.identity.role
    }

    /// Workspace directory owned by this daemon.
    pub fn workspace_dir(&self) -> &PathBuf {
        &self.workspace.dir
    }

    /// The workspace record, for teardown by the supervisor.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Brings the daemon up: state `idle`, heartbeats running.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            self.start_heartbeat(&mut inner);
        }
        self.bus.publish(
            Event::now(EventKind::DaemonStarted)
                .with_agent(self.agent_id())
                .with_name(self.name()),
        );
    }

    /// Stops the daemon: heartbeats cancelled, executor (if any) terminated.
    pub async fn stop(&self) {
        self.token.cancel();
        {
            let mut inner = self.inner.lock().await;
            if let Some(t) = inner.heartbeat_token.take() {
                t.cancel();
            }
            if let Some(t) = inner.executor_kill.take() {
                t.cancel();
            }
        }
        self.bus.publish(
            Event::now(EventKind::DaemonStopped).with_agent(self.agent_id()),
        );
    }

    /// Feeds one structured message into the state machine.
    ///
    /// Everything except a matching `TASK_AVAILABLE`/`ASSIGN` while idle is
    /// ignored.
    pub async fn handle_message(&self, directive: &Directive) {
        let mut inner = self.inner.lock().await;
        if inner.state != DaemonState::Idle {
            return;
        }

        match directive {
            Directive::TaskAvailable { task } => {
                if task.matches_role(self.role()) {
                    self.bus.publish(
                        Event::now(EventKind::Claim)
                            .with_agent(self.agent_id())
                            .with_name(self.name())
                            .with_task(task.clone()),
                    );
                }
            }
            Directive::Assign { agent_id, task } => {
                if agent_id == self.agent_id() {
                    inner.state = DaemonState::Promoting;
                    inner.current_task = Some(task.clone());
                    self.bus.publish(
                        Event::now(EventKind::PromoteRequested)
                            .with_agent(self.agent_id())
                            .with_name(self.name())
                            .with_task(task.clone()),
                    );
                }
            }
            _ => {}
        }
    }

    /// Supervisor approval: spawns the executor and transitions to `active`.
    ///
    /// Preconditions: state is `promoting`. On spawn failure the daemon
    /// publishes `TaskFail` and `DaemonCrashed`, enters `crashed`, and the
    /// error is returned so the caller can release its admission
    /// reservation.
    pub async fn approve_promotion(self: &Arc<Self>, task: TaskBrief) -> Result<u32, SwarmError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != DaemonState::Promoting {
                return Err(SwarmError::InvalidState {
                    agent: self.agent_id().to_string(),
                    expected: "promoting",
                });
            }
            inner.current_task = Some(task.clone());
        }

        workspace::write_context(
            &self.workspace.dir,
            &format!(
                "agent: {}\nstate: active\nrole: {}\ntask: {}\nprompt: {}\n",
                self.name(),
                self.role(),
                task.component.as_deref().unwrap_or("-"),
                task.prompt.as_deref().unwrap_or("-"),
            ),
        )
        .await;

        let spec = match self.exec_spec(&task) {
            Ok(spec) => spec,
            Err(e) => return Err(self.crash(task, e.into()).await),
        };

        let handle = match self.spawner.spawn(spec).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.crash(task, e.into()).await),
        };

        let pid = handle.pid.unwrap_or_default();
        {
            let mut inner = self.inner.lock().await;
            if inner.state != DaemonState::Promoting {
                // Raced a stop; do not leak the child.
                handle.kill.cancel();
                return Err(SwarmError::InvalidState {
                    agent: self.agent_id().to_string(),
                    expected: "promoting",
                });
            }
            inner.state = DaemonState::Active;
            inner.executor_pid = handle.pid;
            inner.executor_kill = Some(handle.kill.clone());
            if let Some(t) = inner.heartbeat_token.take() {
                t.cancel();
            }
        }

        self.bus.publish(
            Event::now(EventKind::Promoted)
                .with_agent(self.agent_id())
                .with_name(self.name())
                .with_task(task.clone())
                .with_pid(pid),
        );

        let me = Arc::clone(self);
        tokio::spawn(async move { me.drive_executor(handle, task, Instant::now()).await });

        Ok(pid)
    }

    /// Supervisor denial: back to `idle`, task cleared.
    pub async fn deny_promotion(&self, reason: &str) -> Result<(), SwarmError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != DaemonState::Promoting {
                return Err(SwarmError::InvalidState {
                    agent: self.agent_id().to_string(),
                    expected: "promoting",
                });
            }
            inner.state = DaemonState::Idle;
            inner.current_task = None;
        }
        self.bus.publish(
            Event::now(EventKind::Unclaim)
                .with_agent(self.agent_id())
                .with_reason(reason),
        );
        Ok(())
    }

    /// Read-only snapshot.
    pub async fn info(&self) -> DaemonInfo {
        let inner = self.inner.lock().await;
        DaemonInfo {
            agent_id: self.agent_id().to_string(),
            name: self.name().to_string(),
            role: self.role().to_string(),
            state: inner.state,
            current_task: inner.current_task.clone(),
            executor_pid: inner.executor_pid,
        }
    }

    /// Current state.
    pub async fn state(&self) -> DaemonState {
        self.inner.lock().await.state
    }

    /// Builds the executor invocation for a task.
    fn exec_spec(&self, task: &TaskBrief) -> Result<ExecSpec, crate::error::SpawnError> {
        let (program, prefix) = self
            .cfg
            .executor_cmd
            .split_first()
            .ok_or(crate::error::SpawnError::NoCommand)?;

        let mut args: Vec<String> = prefix.to_vec();
        args.push(task.prompt.clone().unwrap_or_default());
        args.push(self.workspace.dir.display().to_string());
        args.push(self.name().to_string());

        Ok(ExecSpec {
            program: program.clone(),
            args,
            cwd: self.workspace.dir.clone(),
        })
    }

    /// Terminal spawn/runtime failure: `TaskFail` then `DaemonCrashed`.
    async fn crash(&self, task: TaskBrief, error: SwarmError) -> SwarmError {
        let description = error.to_string();
        self.bus.publish(
            Event::now(EventKind::TaskFail)
                .with_agent(self.agent_id())
                .with_task(task)
                .with_error(&description),
        );

        {
            let mut inner = self.inner.lock().await;
            inner.state = DaemonState::Crashed;
            inner.executor_pid = None;
            inner.executor_kill = None;
            if let Some(t) = inner.heartbeat_token.take() {
                t.cancel();
            }
        }

        workspace::write_context(
            &self.workspace.dir,
            &format!("agent: {}\nstate: crashed\nerror: {description}\n", self.name()),
        )
        .await;

        self.bus.publish(
            Event::now(EventKind::DaemonCrashed)
                .with_agent(self.agent_id())
                .with_name(self.name())
                .with_error(&description),
        );
        error
    }

    /// Owns the executor's streams and exit; runs until the child is gone.
    async fn drive_executor(
        self: Arc<Self>,
        mut handle: ExecutorHandle,
        task: TaskBrief,
        started: Instant,
    ) {
        let mut tail = String::new();
        let mut timed_out = false;
        let mut stopping = false;
        let watchdog = tokio::time::sleep(self.cfg.max_task_duration);
        tokio::pin!(watchdog);

        let outcome = loop {
            select! {
                Some(chunk) = handle.output.recv() => {
                    push_tail(&mut tail, &chunk.text);
                    self.bus.publish(
                        Event::now(EventKind::ExecutorOutput)
                            .with_agent(self.agent_id())
                            .with_chunk(chunk.stream, chunk.text),
                    );
                }
                outcome = &mut handle.exit => {
                    break outcome.unwrap_or(ExitOutcome { code: None, signal: None });
                }
                _ = &mut watchdog, if !timed_out => {
                    timed_out = true;
                    handle.kill.cancel();
                }
                _ = self.token.cancelled(), if !stopping => {
                    stopping = true;
                    handle.kill.cancel();
                }
            }
        };

        // Late chunks that raced the exit notification.
        while let Ok(chunk) = handle.output.try_recv() {
            push_tail(&mut tail, &chunk.text);
        }

        self.finish_execution(task, outcome, tail, timed_out, started.elapsed())
            .await;
    }

    /// Demotion: completion record, `TaskDone`/`TaskFail`, back to `idle`.
    async fn finish_execution(
        &self,
        task: TaskBrief,
        outcome: ExitOutcome,
        tail: String,
        timed_out: bool,
        duration: Duration,
    ) {
        {
            let mut inner = self.inner.lock().await;
            inner.state = DaemonState::Demoting;
            inner.executor_pid = None;
            inner.executor_kill = None;
        }

        let success = outcome.success() && !timed_out;
        let result = if timed_out {
            format!("terminated after exceeding {:?}", self.cfg.max_task_duration)
        } else {
            outcome.describe()
        };

        workspace::write_context(
            &self.workspace.dir,
            &format!(
                "agent: {}\nstate: demoting\ntask: {}\nresult: {result}\noutput tail:\n{tail}\n",
                self.name(),
                task.component.as_deref().unwrap_or("-"),
            ),
        )
        .await;

        let ev = if success {
            Event::now(EventKind::TaskDone)
        } else {
            Event::now(EventKind::TaskFail)
                .with_error(result)
                .with_exit_code(outcome.code.unwrap_or(-1))
        };
        self.bus.publish(
            ev.with_agent(self.agent_id())
                .with_task(task)
                .with_duration(duration)
                .with_chunk("output", tail),
        );

        {
            let mut inner = self.inner.lock().await;
            inner.state = DaemonState::Idle;
            inner.current_task = None;
            if !self.token.is_cancelled() {
                self.start_heartbeat(&mut inner);
            }
        }
        self.bus.publish(
            Event::now(EventKind::Demoted).with_agent(self.agent_id()),
        );
    }

    /// (Re)starts the idle heartbeat loop.
    fn start_heartbeat(&self, inner: &mut DaemonInner) {
        if let Some(t) = inner.heartbeat_token.take() {
            t.cancel();
        }
        let hb_token = self.token.child_token();
        inner.heartbeat_token = Some(hb_token.clone());

        let bus = self.bus.clone();
        let agent_id = self.agent_id().to_string();
        let interval = self.cfg.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                select! {
                    _ = tokio::time::sleep(interval) => {
                        bus.publish(
                            Event::now(EventKind::Heartbeat)
                                .with_agent(&agent_id)
                                .with_reason("idle"),
                        );
                    }
                    _ = hb_token.cancelled() => break,
                }
            }
        });
    }
}

/// Appends to the retained tail, trimming from the front beyond the cap.
fn push_tail(tail: &mut String, chunk: &str) {
    tail.push_str(chunk);
    if tail.len() > OUTPUT_TAIL_CHARS {
        let cut = tail.len() - OUTPUT_TAIL_CHARS;
        // Avoid splitting a UTF-8 sequence.
        let cut = (cut..tail.len())
            .find(|i| tail.is_char_boundary(*i))
            .unwrap_or(tail.len());
        tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::AgentIdentity;

    #[test]
    fn tail_keeps_the_last_chunk_of_output() {
        let mut tail = String::new();
        push_tail(&mut tail, &"a".repeat(1500));
        push_tail(&mut tail, &"b".repeat(1500));
        assert_eq!(tail.len(), OUTPUT_TAIL_CHARS);
        assert!(tail.ends_with(&"b".repeat(1500)));
    }

    #[test]
    fn tail_respects_utf8_boundaries() {
        let mut tail = String::new();
        push_tail(&mut tail, &"é".repeat(1100));
        assert!(tail.len() <= OUTPUT_TAIL_CHARS);
        assert!(tail.chars().all(|c| c == 'é'));
    }

    fn test_workspace(dir: &std::path::Path) -> Workspace {
        Workspace {
            identity: AgentIdentity {
                agent_id: "deadbeef".into(),
                name: "swarm-builder-000".into(),
                role: "builder".into(),
            },
            dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn exec_spec_appends_prompt_workdir_and_name() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let daemon = Daemon::new(
            test_workspace(tmp.path()),
            DaemonConfig {
                executor_cmd: vec!["claude".into(), "--print".into()],
                ..DaemonConfig::default()
            },
            Bus::new(16),
            Arc::new(crate::daemon::executor::ProcessSpawner),
            &token,
        );

        let task = TaskBrief {
            prompt: Some("fix the tests".into()),
            ..TaskBrief::default()
        };
        let spec = daemon.exec_spec(&task).unwrap();
        assert_eq!(spec.program, "claude");
        assert_eq!(spec.args[0], "--print");
        assert_eq!(spec.args[1], "fix the tests");
        assert_eq!(spec.args[2], tmp.path().display().to_string());
        assert_eq!(spec.args[3], "swarm-builder-000");
        assert_eq!(spec.cwd, tmp.path());
    }
}
