//! End-to-end supervisor scenarios.
//!
//! Executors are scripted: the stub spawner hands out handles whose exits
//! the test controls, so admission, queueing, crash recovery, and scaling
//! can be exercised deterministically under tokio's paused clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use swarmvisor::{
    AgentBus, Config, Directive, EstimationMode, Event, EventKind, ExecSpec, ExecutorHandle,
    ExecutorSpawner, ExitOutcome, HealthStatus, LocalHub, OutputChunk, QuotaConfig, SpawnError,
    Supervisor, SupervisorBuilder, SwarmError, TaskBrief,
};

// ── Scripted executor spawner ─────────────────────────────────────────

struct RunningStub {
    complete: mpsc::Sender<ExitOutcome>,
}

#[derive(Default)]
struct StubState {
    fail_next: usize,
    running: VecDeque<RunningStub>,
    spawned: usize,
}

/// Spawner whose executors exit when the test says so. A killed executor
/// reports a signal exit, mirroring a real terminated child.
#[derive(Clone, Default)]
struct StubSpawner {
    state: Arc<Mutex<StubState>>,
}

impl StubSpawner {
    fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` spawns fail.
    async fn fail_next(&self, n: usize) {
        self.state.lock().await.fail_next = n;
    }

    /// Completes the oldest running executor with the given exit code.
    async fn complete_next(&self, code: i32) {
        let stub = self
            .state
            .lock()
            .await
            .running
            .pop_front()
            .expect("no running stub executor");
        stub.complete
            .send(ExitOutcome {
                code: Some(code),
                signal: None,
            })
            .await
            .expect("stub executor already finished");
    }

    async fn spawned(&self) -> usize {
        self.state.lock().await.spawned
    }
}

#[async_trait]
impl ExecutorSpawner for StubSpawner {
    async fn spawn(&self, spec: ExecSpec) -> Result<ExecutorHandle, SpawnError> {
        let mut st = self.state.lock().await;
        st.spawned += 1;
        if st.fail_next > 0 {
            st.fail_next -= 1;
            return Err(SpawnError::Spawn {
                program: spec.program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            });
        }

        let (_out_tx, out_rx) = mpsc::channel::<OutputChunk>(8);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (complete_tx, mut complete_rx) = mpsc::channel::<ExitOutcome>(1);
        let kill = CancellationToken::new();

        let kill_for_relay = kill.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                Some(outcome) = complete_rx.recv() => outcome,
                _ = kill_for_relay.cancelled() => ExitOutcome {
                    code: None,
                    signal: Some(15),
                },
            };
            let _ = exit_tx.send(outcome);
        });

        st.running.push_back(RunningStub {
            complete: complete_tx,
        });

        Ok(ExecutorHandle {
            pid: Some(40_000 + st.spawned as u32),
            output: out_rx,
            exit: exit_rx,
            kill,
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        count: 3,
        max_active: 5,
        role: "builder".to_string(),
        heartbeat_interval: Duration::from_millis(50),
        max_task_duration: Duration::from_secs(300),
        pidfile: dir.join("swarm.pid"),
        log_dir: dir.join("logs"),
        workspace_root: dir.join("workspaces"),
        shutdown_timeout: Duration::from_secs(2),
        executor_cmd: vec!["stub-agent".to_string()],
        ..Config::default()
    }
}

fn task_for(role: &str) -> TaskBrief {
    TaskBrief {
        role: Some(role.to_string()),
        component: Some("api".to_string()),
        prompt: Some("do the thing".to_string()),
        id: None,
    }
}

async fn wait_for(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Lets queued listener work drain under the paused clock.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Agent id of the daemon with the given fleet name.
async fn agent_named(sup: &Arc<Supervisor>, name: &str) -> String {
    sup.status()
        .await
        .agents
        .iter()
        .find(|a| a.name == name)
        .unwrap_or_else(|| panic!("no daemon named {name}"))
        .agent_id
        .clone()
}

// ── S1: admission with cap = 1 ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn admission_cap_queues_second_promotion_and_drains_on_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        max_active: 1,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let d0 = agent_named(&sup, "swarm-builder-000").await;
    let d1 = agent_named(&sup, "swarm-builder-001").await;

    sup.assign_task(&d0, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d0.as_str())
    })
    .await;

    sup.assign_task(&d1, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::PromoteRequested && e.agent.as_deref() == Some(d1.as_str())
    })
    .await;
    settle().await;

    let status = sup.status().await;
    assert_eq!(status.active, 1);
    assert_eq!(status.promoting, 1);
    assert_eq!(status.queue_length, 1);

    // Completing daemon 0's executor admits daemon 1 from the queue.
    spawner.complete_next(0).await;
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d1.as_str())
    })
    .await;
    settle().await;

    let status = sup.status().await;
    assert_eq!(status.active, 1);
    assert_eq!(status.queue_length, 0);

    sup.stop().await;
}

// ── S2: budget exhaustion pauses promotions ───────────────────────────

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_pauses_promotions_and_denies_assigns() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        token_budget: 100,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .with_quota(QuotaConfig {
            mode: EstimationMode::Reported,
            budget: 100,
            ..QuotaConfig::default()
        })
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let probe = sup.quota().unwrap().clone();
    probe.record(&swarmvisor::UsageReport {
        agent_id: "agent-a".into(),
        tokens: Some(85),
        ..Default::default()
    });
    let warning = wait_for(&mut rx, |e| e.kind == EventKind::BudgetWarning).await;
    assert_eq!(warning.pct, Some(85));

    probe.record(&swarmvisor::UsageReport {
        agent_id: "agent-a".into(),
        tokens: Some(15),
        ..Default::default()
    });
    wait_for(&mut rx, |e| e.kind == EventKind::PromotionsPaused).await;
    settle().await;
    assert!(sup.status().await.promotions_paused);

    let d0 = agent_named(&sup, "swarm-builder-000").await;
    sup.assign_task(&d0, task_for("builder")).await.unwrap();
    let unclaim = wait_for(&mut rx, |e| {
        e.kind == EventKind::Unclaim && e.agent.as_deref() == Some(d0.as_str())
    })
    .await;
    assert!(unclaim.reason.unwrap().contains("budget"));
    assert_eq!(spawner.spawned().await, 0);

    sup.stop().await;
}

// ── S3: crash backoff ladder and degradation ──────────────────────────

#[tokio::test(start_paused = true)]
async fn crash_backoff_doubles_then_degrades_on_the_sixth_crash() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        count: 1,
        max_active: 1,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let mut slot = agent_named(&sup, "swarm-builder-000").await;
    let mut delays = Vec::new();

    for _ in 0..5 {
        spawner.fail_next(1).await;
        sup.assign_task(&slot, task_for("builder")).await.unwrap();

        let scheduled =
            wait_for(&mut rx, |e| e.kind == EventKind::RestartScheduled).await;
        delays.push(scheduled.delay.unwrap());

        let restarted =
            wait_for(&mut rx, |e| e.kind == EventKind::AgentRestarted).await;
        let new_slot = restarted.agent.unwrap();
        assert_ne!(new_slot, slot, "replacement must carry a fresh identity");
        slot = new_slot;
        settle().await;
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16),
            Duration::from_secs(32),
        ]
    );

    // Sixth rapid crash: degraded, no further restart scheduled.
    spawner.fail_next(1).await;
    sup.assign_task(&slot, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::AgentDegraded && e.agent.as_deref() == Some(slot.as_str())
    })
    .await;
    settle().await;

    let status = sup.status().await;
    assert_eq!(status.crashed, 1, "degraded slot stays visible");

    sup.stop().await;
}

// ── S4: missed heartbeats escalate to dead, one alert ─────────────────

#[tokio::test(start_paused = true)]
async fn missed_heartbeats_escalate_to_dead_with_a_single_alert() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = Config {
        count: 0,
        heartbeat_interval: Duration::from_millis(10),
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    // An agent registered out-of-band that never heartbeats. The monitor
    // keys misses off wall-clock instants, so the check time is supplied
    // explicitly rather than waiting out the paused runtime clock.
    let health = sup.health().clone();
    health.register("ext-agent", None);
    let late = Instant::now() + Duration::from_millis(50);

    health.check_at(late);
    let alert = wait_for(&mut rx, |e| {
        e.kind == EventKind::HealthAlert && e.reason.as_deref() == Some("unresponsive")
    })
    .await;
    assert_eq!(alert.agent.as_deref(), Some("ext-agent"));
    assert_eq!(health.status("ext-agent"), Some(HealthStatus::Dead));

    // Two more checks without a heartbeat stay silent.
    health.check_at(late + Duration::from_millis(20));
    health.check_at(late + Duration::from_millis(40));
    settle().await;
    let extra = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| e.kind == EventKind::HealthAlert)
        .count();
    assert_eq!(extra, 0);

    // A heartbeat revives the record and re-arms the alert latch.
    health.heartbeat("ext-agent");
    assert_eq!(health.status("ext-agent"), Some(HealthStatus::Alive));

    sup.stop().await;
}

// ── S5: scale-down preserves active work ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn scale_down_removes_only_idle_daemons() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        max_active: 3,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let d0 = agent_named(&sup, "swarm-builder-000").await;
    sup.assign_task(&d0, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d0.as_str())
    })
    .await;

    let report = sup.scale(1).await.unwrap();
    assert_eq!(report.from, 3);
    assert_eq!(report.to, 1);
    assert_eq!(report.removed, 2);

    let status = sup.status().await;
    assert_eq!(status.total, 1);
    assert_eq!(status.active, 1);
    assert_eq!(status.agents[0].agent_id, d0);

    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scale_down_is_capped_by_idle_candidates() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        count: 2,
        max_active: 2,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    // Promote both daemons; nothing is idle.
    for name in ["swarm-builder-000", "swarm-builder-001"] {
        let id = agent_named(&sup, name).await;
        sup.assign_task(&id, task_for("builder")).await.unwrap();
        wait_for(&mut rx, |e| {
            e.kind == EventKind::Promoted && e.agent.as_deref() == Some(id.as_str())
        })
        .await;
    }

    let report = sup.scale(1).await.unwrap();
    assert_eq!(report.removed, 0, "active daemons are never selected");
    assert_eq!(sup.status().await.total, 2);

    sup.stop().await;
}

// ── S6: stale pidfile takeover and pidfile liveness ───────────────────

#[tokio::test(start_paused = true)]
async fn stale_pidfile_is_taken_over_and_released_on_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let pidfile = cfg.pidfile.clone();
    std::fs::create_dir_all(pidfile.parent().unwrap()).unwrap();
    std::fs::write(&pidfile, "999999999").unwrap();

    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();
    sup.start().await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&pidfile).unwrap(),
        std::process::id().to_string()
    );

    sup.stop().await;
    assert!(!pidfile.exists());

    // A pidfile naming a live foreign process refuses the lock.
    std::fs::write(&pidfile, "1").unwrap();
    let sup2 = SupervisorBuilder::new(test_config(tmp.path()))
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();
    assert!(matches!(
        sup2.start().await,
        Err(SwarmError::AlreadyRunning { pid: 1 })
    ));
}

// ── Task watchdog ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn watchdog_terminates_long_executors_as_a_failed_task() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        count: 1,
        max_task_duration: Duration::from_secs(5),
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let d0 = agent_named(&sup, "swarm-builder-000").await;
    sup.assign_task(&d0, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| e.kind == EventKind::Promoted).await;

    // Never complete the executor; the watchdog fires at 5s of task time.
    let fail = wait_for(&mut rx, |e| e.kind == EventKind::TaskFail).await;
    assert!(fail.error.unwrap().contains("exceeding"));
    wait_for(&mut rx, |e| e.kind == EventKind::Demoted).await;
    settle().await;

    // The slot is reusable, not crashed.
    let status = sup.status().await;
    assert_eq!(status.idle, 1);
    assert_eq!(status.crashed, 0);

    sup.stop().await;
}

// ── Role matching over the bus ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn announcements_are_claimed_by_role_and_bridged_to_the_bus() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let hub = LocalHub::new();
    let peer = hub.endpoint("coordinator");
    peer.connect().await.unwrap();
    peer.join("#agents").await.unwrap();
    let mut peer_inbox = peer.inbox();

    let cfg = Config {
        count: 2,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .with_bus(Arc::new(hub.endpoint("swarm-supervisor")))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    // Wrong role: nobody claims.
    peer.send(
        "#agents",
        &Directive::TaskAvailable {
            task: task_for("reviewer"),
        }
        .encode()
        .unwrap(),
    )
    .await
    .unwrap();
    settle().await;

    // Matching role: both builder daemons claim, and CLAIMs reach the peer.
    peer.send(
        "#agents",
        &Directive::TaskAvailable {
            task: task_for("builder"),
        }
        .encode()
        .unwrap(),
    )
    .await
    .unwrap();
    wait_for(&mut rx, |e| e.kind == EventKind::Claim).await;
    settle().await;

    let mut claims = 0;
    while let Ok(msg) = peer_inbox.try_recv() {
        if let Some(Directive::Claim { role, .. }) = Directive::parse(&msg.content) {
            assert_eq!(role, "builder");
            claims += 1;
        }
    }
    assert_eq!(claims, 2);

    // Assignment over the bus promotes exactly the addressed daemon, and
    // completion is bridged back as TASK_DONE.
    let d0 = agent_named(&sup, "swarm-builder-000").await;
    peer.send(
        "#agents",
        &Directive::Assign {
            agent_id: d0.clone(),
            task: task_for("builder"),
        }
        .encode()
        .unwrap(),
    )
    .await
    .unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d0.as_str())
    })
    .await;

    spawner.complete_next(0).await;
    let done = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let msg = peer_inbox.recv().await.expect("peer inbox closed");
            if let Some(Directive::TaskDone { agent_id, success, .. }) =
                Directive::parse(&msg.content)
            {
                break (agent_id, success);
            }
        }
    })
    .await
    .expect("no TASK_DONE on the bus");
    assert_eq!(done, (d0, true));

    sup.stop().await;
}

// ── Config reload opens headroom ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn raising_max_active_drains_the_queue() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = StubSpawner::new();
    let cfg = Config {
        count: 2,
        max_active: 1,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(spawner.clone()))
        .build();
    let mut rx = sup.events();
    sup.start().await.unwrap();

    let d0 = agent_named(&sup, "swarm-builder-000").await;
    let d1 = agent_named(&sup, "swarm-builder-001").await;
    sup.assign_task(&d0, task_for("builder")).await.unwrap();
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d0.as_str())
    })
    .await;
    sup.assign_task(&d1, task_for("builder")).await.unwrap();
    settle().await;
    assert_eq!(sup.status().await.queue_length, 1);

    sup.reload_config(swarmvisor::ConfigPatch {
        max_active: Some(2),
        ..Default::default()
    })
    .await;
    wait_for(&mut rx, |e| {
        e.kind == EventKind::Promoted && e.agent.as_deref() == Some(d1.as_str())
    })
    .await;
    settle().await;
    assert_eq!(sup.status().await.active, 2);

    sup.stop().await;
}

// ── Stopped supervisor refuses control operations ─────────────────────

#[tokio::test(start_paused = true)]
async fn control_operations_require_a_running_swarm() {
    let tmp = tempfile::tempdir().unwrap();
    let sup = SupervisorBuilder::new(test_config(tmp.path()))
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();

    assert!(matches!(sup.scale(5).await, Err(SwarmError::NotRunning)));
    assert!(matches!(
        sup.broadcast_task(task_for("builder")).await,
        Err(SwarmError::NotRunning)
    ));

    // stop() on a stopped supervisor is a no-op.
    sup.stop().await;

    sup.start().await.unwrap();
    sup.stop().await;
    assert!(matches!(sup.scale(5).await, Err(SwarmError::NotRunning)));
}

// ── Workspaces are torn down on stop unless persist ───────────────────

#[tokio::test(start_paused = true)]
async fn stop_tears_down_workspaces_unless_persist() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let workspace_root = cfg.workspace_root.clone();
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();
    sup.start().await.unwrap();
    assert_eq!(std::fs::read_dir(&workspace_root).unwrap().count(), 3);
    sup.stop().await;
    assert_eq!(std::fs::read_dir(&workspace_root).unwrap().count(), 0);

    let cfg = Config {
        persist: true,
        ..test_config(tmp.path())
    };
    let sup = SupervisorBuilder::new(cfg)
        .with_spawner(Arc::new(StubSpawner::new()))
        .build();
    sup.start().await.unwrap();
    sup.stop().await;
    assert_eq!(std::fs::read_dir(&workspace_root).unwrap().count(), 3);
}
