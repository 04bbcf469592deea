//! # Supervisor: composes the swarm and arbitrates promotions.
//!
//! The [`Supervisor`] owns the process table, the promotion admission
//! controller and its queue, crash recovery with bounded backoff, scaling,
//! and the routing between the agent bus and the daemon state machines.
//!
//! ## Architecture
//! ```text
//! AgentBus ──inbox──► router task ──► Daemon::handle_message
//!
//! Daemons / probes ──publish──► Bus ──► event listener (single task)
//!                                         ├─ Heartbeat        → HealthMonitor
//!                                         ├─ PromoteRequested → admission
//!                                         ├─ Demoted          → counter + queue drain
//!                                         ├─ TaskDone/Fail    → quota + bus bridge
//!                                         ├─ Claim            → bus bridge (CLAIM)
//!                                         ├─ DaemonCrashed    → crash recovery
//!                                         ├─ HealthAlert      → crash recovery
//!                                         └─ BudgetExhausted  → pause promotions
//!                                 Bus ──► per-subscriber workers (SubscriberSet)
//! ```
//!
//! ## Rules
//! - The event listener is the serialization point for admission, counters,
//!   and recovery; the state mutex is never held across an await.
//! - `active_count` is **reserved at approval** and released on `Demoted`
//!   (or on approval failure). The daemon publishes `Promoted` inside
//!   `approve_promotion`, so reservation and emission coincide; counting at
//!   event-delivery time would let back-to-back requests overshoot the cap.
//! - Promotion-queue dequeue plus admission form one step per request.
//! - Backoff timers check the runtime token before firing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{AgentBus, BusNotice, Directive, TaskBrief};
use crate::config::Config;
use crate::daemon::{Daemon, DaemonConfig, DaemonState, ExecutorSpawner};
use crate::error::SwarmError;
use crate::events::{Bus, Event, EventKind};
use crate::health::HealthMonitor;
use crate::pidfile::Pidfile;
use crate::policies::{RecoveryDecision, RecoveryPolicy};
use crate::quota::{QuotaProbe, UsageReport};
use crate::subscribers::SubscriberSet;
use crate::supervisor::admission::{PromotionQueue, PromotionRequest};
use crate::supervisor::status::{AgentStatus, ConfigPatch, ScaleReport, SwarmStatus};
use crate::supervisor::table::DaemonRecord;
use crate::workspace::WorkspaceProvider;

/// Poll step while waiting for executors to wind down during `stop`.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Mutable swarm state, serialized behind one mutex.
///
/// The mutex is only ever held for plain field work, never across an await.
struct SwarmState {
    running: bool,
    started_at: Option<Instant>,
    runtime_token: CancellationToken,
    pidfile: Option<Pidfile>,
    table: HashMap<String, DaemonRecord>,
    queue: PromotionQueue,
    active_count: usize,
    promotions_paused: bool,
    tokens_used: u64,
    next_index: usize,
    max_active: usize,
    token_budget: u64,
    heartbeat_interval: Duration,
}

/// Admission verdict for one promotion request.
enum AdmissionVerdict {
    Approve,
    Queued,
    Deny(&'static str),
    PauseAndDeny(&'static str),
}

/// Supervises a fleet of daemons.
///
/// Construct through [`SupervisorBuilder`](crate::SupervisorBuilder).
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    agent_bus: Option<Arc<dyn AgentBus>>,
    workspaces: Arc<dyn WorkspaceProvider>,
    spawner: Arc<dyn ExecutorSpawner>,
    health: Arc<HealthMonitor>,
    quota: Option<Arc<QuotaProbe>>,
    recovery: RecoveryPolicy,
    state: Mutex<SwarmState>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        agent_bus: Option<Arc<dyn AgentBus>>,
        workspaces: Arc<dyn WorkspaceProvider>,
        spawner: Arc<dyn ExecutorSpawner>,
        health: Arc<HealthMonitor>,
        quota: Option<Arc<QuotaProbe>>,
        recovery: RecoveryPolicy,
    ) -> Self {
        let max_active = cfg.max_active;
        let token_budget = cfg.token_budget;
        let heartbeat_interval = cfg.heartbeat_interval;
        Self {
            cfg,
            bus,
            subs,
            agent_bus,
            workspaces,
            spawner,
            health,
            quota,
            recovery,
            state: Mutex::new(SwarmState {
                running: false,
                started_at: None,
                runtime_token: CancellationToken::new(),
                pidfile: None,
                table: HashMap::new(),
                queue: PromotionQueue::default(),
                active_count: 0,
                promotions_paused: false,
                tokens_used: 0,
                next_index: 0,
                max_active,
                token_budget,
                heartbeat_interval,
            }),
        }
    }

    /// Subscribes to the internal event stream.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// The health monitor.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// The quota probe, when attached.
    pub fn quota(&self) -> Option<&Arc<QuotaProbe>> {
        self.quota.as_ref()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts the swarm: pidfile, bus, fleet, health monitor.
    ///
    /// Bus failures are degradations, not errors; only a live pidfile holder
    /// makes `start` fail.
    pub async fn start(self: &Arc<Self>) -> Result<(), SwarmError> {
        let pidfile = Pidfile::acquire(&self.cfg.pidfile)?;

        let runtime_token = CancellationToken::new();
        {
            let mut st = self.state.lock().await;
            if st.running {
                return Err(SwarmError::AlreadyRunning {
                    pid: std::process::id() as i32,
                });
            }
            st.running = true;
            st.started_at = Some(Instant::now());
            st.runtime_token = runtime_token.clone();
            st.pidfile = Some(pidfile);
            st.active_count = 0;
            st.promotions_paused = false;
            st.next_index = 0;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.cfg.log_dir).await {
            warn!(event = "log_dir_failed", dir = %self.cfg.log_dir.display(), error = %e);
        }

        // Listeners come up before the fleet so no early event is missed.
        self.spawn_event_listener(&runtime_token);
        self.subs.spawn_workers(&runtime_token);

        if let Some(agent_bus) = &self.agent_bus {
            match agent_bus.connect().await {
                Ok(bus_id) => {
                    for channel in &self.cfg.channels {
                        if let Err(e) = agent_bus.join(channel).await {
                            warn!(event = "bus_join_failed", channel = %channel, error = %e);
                        }
                    }
                    self.spawn_bus_router(&runtime_token);
                    self.spawn_notice_logger(&runtime_token);
                    info!(event = "bus_connected", bus_id = %bus_id);
                }
                Err(e) => {
                    warn!(event = "bus_connect_failed", error = %e);
                }
            }
        }

        for _ in 0..self.cfg.count {
            if let Err(e) = self.spawn_daemon().await {
                warn!(event = "daemon_spawn_failed", error = %e);
            }
        }

        self.spawn_health_ticker(&runtime_token);

        self.bus
            .publish(Event::now(EventKind::SwarmStarted).with_count(self.cfg.count));
        Ok(())
    }

    /// Stops the swarm cooperatively.
    ///
    /// Executors receive a terminate signal and get up to
    /// `shutdown_timeout` to wind down; past the deadline the supervisor
    /// stops waiting on anyone. A stopped supervisor is a no-op.
    pub async fn stop(self: &Arc<Self>) {
        let (token, daemons) = {
            let mut st = self.state.lock().await;
            if !st.running {
                return;
            }
            st.running = false;
            let daemons: Vec<Arc<Daemon>> =
                st.table.values().map(|r| Arc::clone(&r.daemon)).collect();
            (st.runtime_token.clone(), daemons)
        };
        token.cancel();

        if let Some(agent_bus) = &self.agent_bus {
            if let Err(e) = agent_bus.disconnect().await {
                warn!(event = "bus_disconnect_failed", error = %e);
            }
        }

        for daemon in &daemons {
            daemon.stop().await;
        }
        self.await_executor_wind_down(&daemons).await;

        for daemon in &daemons {
            self.health.unregister(daemon.agent_id());
            if !self.cfg.persist {
                if let Err(e) = self.workspaces.teardown(daemon.workspace()).await {
                    warn!(event = "workspace_teardown_failed", error = %e);
                }
            }
        }

        {
            let mut st = self.state.lock().await;
            st.table.clear();
            st.queue.clear();
            st.active_count = 0;
            st.started_at = None;
            if let Some(pidfile) = st.pidfile.take() {
                pidfile.release();
            }
        }

        self.bus.publish(Event::now(EventKind::SwarmStopped));
    }

    /// Waits up to `shutdown_timeout` for executors to finish demoting.
    async fn await_executor_wind_down(&self, daemons: &[Arc<Daemon>]) {
        let deadline = async {
            loop {
                let mut busy = false;
                for daemon in daemons {
                    if matches!(
                        daemon.state().await,
                        DaemonState::Active | DaemonState::Demoting
                    ) {
                        busy = true;
                        break;
                    }
                }
                if !busy {
                    return;
                }
                tokio::time::sleep(STOP_POLL_INTERVAL).await;
            }
        };
        let _ = tokio::time::timeout(self.cfg.shutdown_timeout, deadline).await;
    }

    // ------------------------------------------------------------------
    // Fleet management
    // ------------------------------------------------------------------

    /// Provisions a workspace and brings up a daemon in a fresh slot.
    async fn spawn_daemon(self: &Arc<Self>) -> Result<String, SwarmError> {
        let (name, runtime_token, heartbeat_interval) = {
            let mut st = self.state.lock().await;
            let name = format!("swarm-{}-{:03}", self.cfg.role, st.next_index);
            st.next_index += 1;
            (name, st.runtime_token.clone(), st.heartbeat_interval)
        };
        self.spawn_named_daemon(&name, &self.cfg.role, &runtime_token, heartbeat_interval)
            .await
    }

    /// Brings up a daemon under an explicit name (fresh slots and restarts).
    async fn spawn_named_daemon(
        self: &Arc<Self>,
        name: &str,
        role: &str,
        runtime_token: &CancellationToken,
        heartbeat_interval: Duration,
    ) -> Result<String, SwarmError> {
        let workspace = self.workspaces.provision(name, role).await?;
        let agent_id = workspace.identity.agent_id.clone();

        let daemon = Daemon::new(
            workspace,
            DaemonConfig {
                heartbeat_interval,
                max_task_duration: self.cfg.max_task_duration,
                executor_cmd: self.cfg.executor_cmd.clone(),
            },
            self.bus.clone(),
            Arc::clone(&self.spawner),
            runtime_token,
        );
        daemon.start().await;
        self.health.register(&agent_id, None);

        let mut st = self.state.lock().await;
        st.table
            .insert(agent_id.clone(), DaemonRecord::new(daemon));
        Ok(agent_id)
    }

    /// Changes the fleet size. `scale(0)` equals `stop()`.
    ///
    /// Scale-down only ever removes idle daemons, longest-idle first; the
    /// delta is capped by the number of idle candidates.
    pub async fn scale(self: &Arc<Self>, target: usize) -> Result<ScaleReport, SwarmError> {
        let current = {
            let st = self.state.lock().await;
            if !st.running {
                return Err(SwarmError::NotRunning);
            }
            st.table.len()
        };

        if target == 0 {
            self.stop().await;
            return Ok(ScaleReport {
                from: current,
                to: 0,
                added: 0,
                removed: current,
            });
        }

        if target > current {
            let mut added = 0;
            for _ in current..target {
                match self.spawn_daemon().await {
                    Ok(_) => added += 1,
                    Err(e) => warn!(event = "daemon_spawn_failed", error = %e),
                }
            }
            info!(event = "scaled_up", from = current, to = current + added);
            self.bus
                .publish(Event::now(EventKind::ScaledUp).with_count(added));
            return Ok(ScaleReport {
                from: current,
                to: current + added,
                added,
                removed: 0,
            });
        }

        if target < current {
            let removed = self.scale_down(current - target).await;
            info!(event = "scaled_down", from = current, to = current - removed);
            self.bus
                .publish(Event::now(EventKind::ScaledDown).with_count(removed));
            return Ok(ScaleReport {
                from: current,
                to: current - removed,
                added: 0,
                removed,
            });
        }

        Ok(ScaleReport {
            from: current,
            to: current,
            added: 0,
            removed: 0,
        })
    }

    /// Removes up to `want` idle daemons, longest-idle first.
    async fn scale_down(self: &Arc<Self>, want: usize) -> usize {
        let candidates: Vec<(String, Arc<Daemon>, Instant)> = {
            let st = self.state.lock().await;
            st.table
                .iter()
                .map(|(id, rec)| (id.clone(), Arc::clone(&rec.daemon), rec.stable_since))
                .collect()
        };

        // Active work is never selected; check state outside the lock.
        let mut idle: Vec<(String, Arc<Daemon>, Instant)> = Vec::new();
        for (id, daemon, stable_since) in candidates {
            if daemon.state().await == DaemonState::Idle {
                idle.push((id, daemon, stable_since));
            }
        }
        idle.sort_by_key(|(_, _, stable_since)| *stable_since);
        idle.truncate(want);

        let mut removed = 0;
        for (agent_id, daemon, _) in idle {
            let still_there = {
                let mut st = self.state.lock().await;
                st.table.remove(&agent_id).is_some()
            };
            if !still_there {
                continue;
            }
            daemon.stop().await;
            self.health.unregister(&agent_id);
            if !self.cfg.persist {
                if let Err(e) = self.workspaces.teardown(daemon.workspace()).await {
                    warn!(event = "workspace_teardown_failed", error = %e);
                }
            }
            removed += 1;
        }
        removed
    }

    // ------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------

    /// Announces a task: locally to every daemon, and on the primary channel
    /// when a bus is connected.
    ///
    /// The local leg always runs — the bus suppresses sender echo, so the
    /// supervisor's own daemons would otherwise never see the announcement.
    pub async fn broadcast_task(self: &Arc<Self>, task: TaskBrief) -> Result<(), SwarmError> {
        if !self.state.lock().await.running {
            return Err(SwarmError::NotRunning);
        }
        let directive = Directive::TaskAvailable { task };

        self.send_on_primary_channel(&directive).await;
        self.deliver_local(&directive).await;
        Ok(())
    }

    /// Assigns a task directly to one local daemon.
    pub async fn assign_task(
        self: &Arc<Self>,
        agent_id: &str,
        task: TaskBrief,
    ) -> Result<(), SwarmError> {
        let daemon = {
            let st = self.state.lock().await;
            if !st.running {
                return Err(SwarmError::NotRunning);
            }
            st.table
                .get(agent_id)
                .map(|r| Arc::clone(&r.daemon))
                .ok_or_else(|| SwarmError::UnknownAgent {
                    agent: agent_id.to_string(),
                })?
        };

        let directive = Directive::Assign {
            agent_id: agent_id.to_string(),
            task,
        };
        daemon.handle_message(&directive).await;
        Ok(())
    }

    /// Applies runtime config changes and drains the queue against any new
    /// headroom.
    pub async fn reload_config(self: &Arc<Self>, patch: ConfigPatch) {
        {
            let mut st = self.state.lock().await;
            if let Some(max_active) = patch.max_active {
                st.max_active = max_active;
            }
            if let Some(budget) = patch.token_budget {
                st.token_budget = budget;
                if budget > st.tokens_used {
                    st.promotions_paused = false;
                }
            }
            if let Some(interval) = patch.heartbeat_interval {
                st.heartbeat_interval = interval;
            }
        }
        if let (Some(probe), Some(budget)) = (&self.quota, patch.token_budget) {
            probe.set_budget(budget);
        }
        self.process_promotion_queue().await;
    }

    /// Read-only snapshot of the swarm.
    pub async fn status(&self) -> SwarmStatus {
        let (running, started_at, paused, queue_length, entries) = {
            let st = self.state.lock().await;
            let entries: Vec<(Arc<Daemon>, u32)> = st
                .table
                .values()
                .map(|r| (Arc::clone(&r.daemon), r.restart_count))
                .collect();
            (
                st.running,
                st.started_at,
                st.promotions_paused,
                st.queue.len(),
                entries,
            )
        };

        let mut agents = Vec::with_capacity(entries.len());
        for (daemon, restart_count) in entries {
            let info = daemon.info().await;
            agents.push(AgentStatus {
                agent_id: info.agent_id,
                name: info.name,
                state: info.state,
                role: info.role,
                restart_count,
                current_task: info.current_task,
            });
        }

        let count_state =
            |s: DaemonState| agents.iter().filter(|a| a.state == s).count();
        SwarmStatus {
            running,
            uptime: started_at.map(|t| t.elapsed()).unwrap_or_default(),
            total: agents.len(),
            active: count_state(DaemonState::Active),
            idle: count_state(DaemonState::Idle),
            promoting: count_state(DaemonState::Promoting),
            crashed: count_state(DaemonState::Crashed),
            promotions_paused: paused,
            queue_length,
            agents,
        }
    }

    // ------------------------------------------------------------------
    // Event listener
    // ------------------------------------------------------------------

    /// Single fan-in point for all runtime events; the serialization domain
    /// of the control plane.
    fn spawn_event_listener(self: &Arc<Self>, runtime_token: &CancellationToken) {
        let mut rx = self.bus.subscribe();
        let token = runtime_token.clone();
        let me = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => me.handle_event(ev).await,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(event = "listener_lagged", skipped);
                            continue;
                        }
                    }
                }
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, ev: Event) {
        match ev.kind {
            EventKind::Heartbeat => {
                if let Some(agent) = &ev.agent {
                    self.health.heartbeat(agent);
                }
            }
            EventKind::PromoteRequested => {
                if let (Some(agent), Some(task)) = (ev.agent, ev.task) {
                    self.handle_promote_request(PromotionRequest {
                        agent_id: agent,
                        task,
                    })
                    .await;
                }
            }
            EventKind::Promoted => {
                if let Some(agent) = &ev.agent {
                    self.health.update_pid(agent, ev.pid);
                }
            }
            EventKind::ExecutorOutput => {
                // Output is liveness: an executor that prints is not stuck.
                if let Some(agent) = &ev.agent {
                    self.health.heartbeat(agent);
                }
            }
            EventKind::Demoted => {
                if let Some(agent) = &ev.agent {
                    let known = {
                        let mut st = self.state.lock().await;
                        let known = st.table.contains_key(agent);
                        if known {
                            st.active_count = st.active_count.saturating_sub(1);
                        }
                        known
                    };
                    if known {
                        self.health.update_pid(agent, None);
                        self.process_promotion_queue().await;
                    }
                }
            }
            EventKind::TaskDone | EventKind::TaskFail => {
                self.record_usage(&ev).await;
                self.bridge_completion(&ev).await;
            }
            EventKind::Claim => {
                self.bridge_claim(&ev).await;
            }
            EventKind::DaemonCrashed => {
                if let Some(agent) = &ev.agent {
                    let error = ev.error.clone().unwrap_or_else(|| "unknown".to_string());
                    self.handle_crash(agent, &error).await;
                }
            }
            EventKind::HealthAlert => {
                if ev.reason.as_deref() == Some("unresponsive") {
                    if let Some(agent) = &ev.agent {
                        self.handle_unresponsive(agent).await;
                    }
                }
            }
            EventKind::BudgetExhausted => {
                let newly_paused = {
                    let mut st = self.state.lock().await;
                    let newly = !st.promotions_paused;
                    st.promotions_paused = true;
                    if let Some(probe) = &self.quota {
                        st.tokens_used = probe.total();
                    }
                    newly
                };
                if newly_paused {
                    warn!(event = "promotions_paused", reason = "budget_exhausted");
                    self.bus.publish(
                        Event::now(EventKind::PromotionsPaused).with_reason("budget_exhausted"),
                    );
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Promotion admission
    // ------------------------------------------------------------------

    /// The admission controller: pause, cap, and budget checks in order.
    async fn handle_promote_request(self: &Arc<Self>, req: PromotionRequest) {
        let verdict = {
            let mut st = self.state.lock().await;
            if !st.running {
                return;
            }
            if st.promotions_paused {
                AdmissionVerdict::Deny("promotions paused (budget/quota)")
            } else if st.active_count >= st.max_active {
                st.queue.push(req.clone());
                AdmissionVerdict::Queued
            } else if st.token_budget > 0 && st.tokens_used >= st.token_budget {
                st.promotions_paused = true;
                AdmissionVerdict::PauseAndDeny("token budget exhausted")
            } else {
                st.active_count += 1;
                AdmissionVerdict::Approve
            }
        };

        match verdict {
            AdmissionVerdict::Queued => {}
            AdmissionVerdict::Deny(reason) => {
                self.deny(&req.agent_id, reason).await;
            }
            AdmissionVerdict::PauseAndDeny(reason) => {
                warn!(event = "promotions_paused", reason = "token_budget");
                self.bus.publish(
                    Event::now(EventKind::PromotionsPaused).with_reason("token_budget"),
                );
                self.deny(&req.agent_id, reason).await;
            }
            AdmissionVerdict::Approve => {
                self.approve(&req.agent_id, req.task).await;
            }
        }
    }

    /// Approves a reserved request; releases the reservation on any failure.
    async fn approve(self: &Arc<Self>, agent_id: &str, task: TaskBrief) {
        let daemon = {
            let st = self.state.lock().await;
            st.table.get(agent_id).map(|r| Arc::clone(&r.daemon))
        };

        let approved = match daemon {
            Some(daemon) => daemon.approve_promotion(task).await.is_ok(),
            None => false,
        };
        if !approved {
            let mut st = self.state.lock().await;
            st.active_count = st.active_count.saturating_sub(1);
        }
    }

    async fn deny(self: &Arc<Self>, agent_id: &str, reason: &str) {
        let daemon = {
            let st = self.state.lock().await;
            st.table.get(agent_id).map(|r| Arc::clone(&r.daemon))
        };
        if let Some(daemon) = daemon {
            // A stale request (daemon no longer promoting) is not an error.
            let _ = daemon.deny_promotion(reason).await;
        }
    }

    /// Drains the queue while headroom lasts, discarding stale entries.
    async fn process_promotion_queue(self: &Arc<Self>) {
        loop {
            let req = {
                let mut st = self.state.lock().await;
                if !st.running
                    || st.promotions_paused
                    || st.active_count >= st.max_active
                    || st.queue.is_empty()
                {
                    return;
                }
                match st.queue.pop() {
                    Some(req) => {
                        st.active_count += 1;
                        req
                    }
                    None => return,
                }
            };

            let daemon = {
                let st = self.state.lock().await;
                st.table.get(&req.agent_id).map(|r| Arc::clone(&r.daemon))
            };

            let approved = match daemon {
                Some(daemon) if daemon.state().await == DaemonState::Promoting => {
                    daemon.approve_promotion(req.task).await.is_ok()
                }
                // Stale entry: the daemon moved on; discard and continue.
                _ => false,
            };
            if !approved {
                let mut st = self.state.lock().await;
                st.active_count = st.active_count.saturating_sub(1);
            }
        }
    }

    // ------------------------------------------------------------------
    // Crash recovery
    // ------------------------------------------------------------------

    /// Routes a heartbeat timeout into crash recovery, unless the daemon is
    /// busy with an executor (executors do not heartbeat; output and exit
    /// cover their liveness).
    async fn handle_unresponsive(self: &Arc<Self>, agent_id: &str) {
        let daemon = {
            let st = self.state.lock().await;
            st.table.get(agent_id).map(|r| Arc::clone(&r.daemon))
        };
        let Some(daemon) = daemon else { return };
        if matches!(
            daemon.state().await,
            DaemonState::Active | DaemonState::Demoting
        ) {
            return;
        }
        self.handle_crash(agent_id, "heartbeat timeout").await;
    }

    /// The crash-recovery state machine: burst reset, degradation detection,
    /// bounded backoff, replacement scheduling.
    async fn handle_crash(self: &Arc<Self>, agent_id: &str, error: &str) {
        let now = Instant::now();
        let scheduled = {
            let mut st = self.state.lock().await;
            let st = &mut *st;
            let Some(rec) = st.table.get_mut(agent_id) else {
                return;
            };
            if rec.restart_scheduled {
                return;
            }

            rec.restart_count += 1;
            if rec.first_restart_at.is_none() {
                rec.first_restart_at = Some(now);
            }
            if self.recovery.is_new_burst(rec.stable_since, now) {
                rec.restart_count = 1;
                rec.first_restart_at = Some(now);
            }

            let first_restart_at = rec.first_restart_at.unwrap_or(now);
            match self.recovery.assess(rec.restart_count, first_restart_at, now) {
                RecoveryDecision::Degraded => None,
                RecoveryDecision::Backoff(delay) => {
                    rec.restart_scheduled = true;
                    Some((
                        delay,
                        rec.restart_count,
                        rec.first_restart_at,
                        rec.daemon.name().to_string(),
                        rec.daemon.role().to_string(),
                        st.runtime_token.clone(),
                    ))
                }
            }
        };

        let Some((delay, restart_count, first_restart_at, name, role, token)) = scheduled else {
            warn!(event = "agent_degraded", agent = agent_id, error);
            self.bus.publish(
                Event::now(EventKind::AgentDegraded)
                    .with_agent(agent_id)
                    .with_error(error),
            );
            return;
        };

        info!(
            event = "agent_restart_scheduled",
            agent = agent_id,
            delay_secs = delay.as_secs(),
            restart_count
        );
        self.bus.publish(
            Event::now(EventKind::RestartScheduled)
                .with_agent(agent_id)
                .with_delay(delay)
                .with_count(restart_count as usize),
        );

        let me = Arc::clone(self);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            me.restart_slot(&agent_id, &name, &role, restart_count, first_restart_at)
                .await;
        });
    }

    /// Replaces a crashed slot: dispose of the old daemon, spawn a fresh one
    /// under the same name, carry the burst bookkeeping over.
    async fn restart_slot(
        self: &Arc<Self>,
        old_id: &str,
        name: &str,
        role: &str,
        restart_count: u32,
        first_restart_at: Option<Instant>,
    ) {
        let (old_daemon, runtime_token, heartbeat_interval) = {
            let mut st = self.state.lock().await;
            if !st.running {
                return;
            }
            let Some(rec) = st.table.remove(old_id) else {
                return;
            };
            (rec.daemon, st.runtime_token.clone(), st.heartbeat_interval)
        };

        let was_active = old_daemon.state().await == DaemonState::Active;
        old_daemon.stop().await;
        self.health.unregister(old_id);
        if was_active {
            let mut st = self.state.lock().await;
            st.active_count = st.active_count.saturating_sub(1);
        }
        if !self.cfg.persist {
            if let Err(e) = self.workspaces.teardown(old_daemon.workspace()).await {
                warn!(event = "workspace_teardown_failed", error = %e);
            }
        }

        match self
            .spawn_named_daemon(name, role, &runtime_token, heartbeat_interval)
            .await
        {
            Ok(new_id) => {
                {
                    let mut st = self.state.lock().await;
                    if let Some(rec) = st.table.get_mut(&new_id) {
                        rec.restart_count = restart_count;
                        rec.first_restart_at = first_restart_at;
                        rec.stable_since = Instant::now();
                    }
                }
                info!(event = "agent_restarted", old_id, new_id = %new_id, name);
                self.bus.publish(
                    Event::now(EventKind::AgentRestarted)
                        .with_agent(new_id)
                        .with_name(name)
                        .with_reason(old_id.to_string()),
                );
            }
            Err(e) => {
                warn!(event = "agent_restart_failed", old_id, error = %e);
            }
        }

        self.process_promotion_queue().await;
    }

    // ------------------------------------------------------------------
    // Bus routing
    // ------------------------------------------------------------------

    /// Inbound: parse directives and deliver task traffic to the fleet.
    fn spawn_bus_router(self: &Arc<Self>, runtime_token: &CancellationToken) {
        let Some(agent_bus) = &self.agent_bus else {
            return;
        };
        let mut inbox = agent_bus.inbox();
        let token = runtime_token.clone();
        let me = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = inbox.recv() => match msg {
                        Ok(msg) => {
                            // Parse failures and foreign types are silence.
                            if let Some(directive) = Directive::parse(&msg.content) {
                                if matches!(
                                    directive,
                                    Directive::TaskAvailable { .. } | Directive::Assign { .. }
                                ) {
                                    me.deliver_local(&directive).await;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
    }

    /// Logs transport notices; the swarm runs on without the bus.
    fn spawn_notice_logger(self: &Arc<Self>, runtime_token: &CancellationToken) {
        let Some(agent_bus) = &self.agent_bus else {
            return;
        };
        let mut notices = agent_bus.notices();
        let token = runtime_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notice = notices.recv() => match notice {
                        Ok(BusNotice::Disconnected { reason }) => {
                            warn!(event = "bus_disconnected", reason = %reason);
                        }
                        Ok(BusNotice::Error { detail }) => {
                            warn!(event = "bus_error", detail = %detail);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
    }

    /// Hands a directive to every daemon; each filters by state and address.
    async fn deliver_local(&self, directive: &Directive) {
        let daemons: Vec<Arc<Daemon>> = {
            let st = self.state.lock().await;
            st.table.values().map(|r| Arc::clone(&r.daemon)).collect()
        };
        for daemon in daemons {
            daemon.handle_message(directive).await;
        }
    }

    /// Outbound: `claim` events become `CLAIM` messages.
    async fn bridge_claim(&self, ev: &Event) {
        let Some(agent) = &ev.agent else { return };
        let role = {
            let st = self.state.lock().await;
            st.table
                .get(agent)
                .map(|r| r.daemon.role().to_string())
        };
        let Some(role) = role else { return };

        let directive = Directive::Claim {
            agent_id: agent.clone(),
            component: ev.task.as_ref().and_then(|t| t.component.clone()),
            role,
        };
        self.send_on_primary_channel(&directive).await;
    }

    /// Outbound: `done`/`fail` events become `TASK_DONE`/`TASK_FAIL`.
    async fn bridge_completion(&self, ev: &Event) {
        let Some(agent) = &ev.agent else { return };
        let task = ev.task.clone().unwrap_or_default();
        let directive = if ev.kind == EventKind::TaskDone {
            Directive::TaskDone {
                agent_id: agent.clone(),
                task,
                success: true,
            }
        } else {
            Directive::TaskFail {
                agent_id: agent.clone(),
                task,
                error: ev.error.clone().unwrap_or_else(|| "task failed".to_string()),
            }
        };
        self.send_on_primary_channel(&directive).await;
    }

    /// Best-effort send on the primary channel; failures are logged only.
    async fn send_on_primary_channel(&self, directive: &Directive) {
        let Some(agent_bus) = &self.agent_bus else {
            return;
        };
        let Some(channel) = self.cfg.channels.first() else {
            return;
        };
        let content = match directive.encode() {
            Ok(content) => content,
            Err(e) => {
                warn!(event = "directive_encode_failed", error = %e);
                return;
            }
        };
        if let Err(e) = agent_bus.send(channel, &content).await {
            warn!(event = "bus_send_failed", error = %e);
        }
    }

    // ------------------------------------------------------------------
    // Quota and health plumbing
    // ------------------------------------------------------------------

    /// Applies a completion to the quota probe and syncs the usage counter.
    async fn record_usage(self: &Arc<Self>, ev: &Event) {
        let Some(probe) = &self.quota else { return };
        let Some(agent) = &ev.agent else { return };

        probe.record(&UsageReport {
            agent_id: agent.clone(),
            tokens: ev.tokens,
            output: ev.chunk.clone(),
            duration: ev.duration,
        });

        let mut st = self.state.lock().await;
        st.tokens_used = probe.total();
    }

    /// Ticks the health monitor on the heartbeat cadence.
    fn spawn_health_ticker(self: &Arc<Self>, runtime_token: &CancellationToken) {
        let token = runtime_token.clone();
        let health = Arc::clone(&self.health);
        let interval = self.cfg.heartbeat_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => health.check(),
                }
            }
        });
    }
}
