//! # Executor spawning.
//!
//! [`ExecutorSpawner`] is the seam between a daemon and the child process
//! that actually performs work. The production implementation,
//! [`ProcessSpawner`], drives `tokio::process`; tests swap in a scripted
//! spawner to control output and exit deterministically.
//!
//! A spawned executor hands back an [`ExecutorHandle`]:
//! - `output`: stdout/stderr chunks, tagged with the stream name
//! - `exit`: one [`ExitOutcome`] when the child is gone
//! - `kill`: cancel to terminate the child (watchdog, shutdown)
//!
//! The handle owner must keep draining `output` until `exit` resolves;
//! readers stop on their own when the pipes close.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::SpawnError;

/// Chunk capacity for output forwarding.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Read buffer per stream.
const READ_BUF_SIZE: usize = 4096;

/// What to run and where.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    /// Program to execute.
    pub program: String,
    /// Full argument list.
    pub args: Vec<String>,
    /// Working directory (the daemon's workspace).
    pub cwd: PathBuf,
}

/// One chunk of executor output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// `"stdout"` or `"stderr"`.
    pub stream: &'static str,
    /// Lossily decoded chunk text.
    pub text: String,
}

/// Terminal state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the child was killed (Unix).
    pub signal: Option<i32>,
}

impl ExitOutcome {
    /// Clean exit.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Renders the outcome for completion records.
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "unknown exit".to_string(),
        }
    }
}

/// Live executor owned by exactly one daemon.
#[derive(Debug)]
pub struct ExecutorHandle {
    /// OS pid, when the transport has one.
    pub pid: Option<u32>,
    /// Output chunks until the pipes close.
    pub output: mpsc::Receiver<OutputChunk>,
    /// Resolves once with the terminal outcome.
    pub exit: oneshot::Receiver<ExitOutcome>,
    /// Cancel to terminate the child.
    pub kill: CancellationToken,
}

/// Capability to launch executors.
#[async_trait]
pub trait ExecutorSpawner: Send + Sync {
    /// Launches an executor; errors route the daemon into `crashed`.
    async fn spawn(&self, spec: ExecSpec) -> Result<ExecutorHandle, SpawnError>;
}

/// Spawns real OS processes.
pub struct ProcessSpawner;

#[async_trait]
impl ExecutorSpawner for ProcessSpawner {
    async fn spawn(&self, spec: ExecSpec) -> Result<ExecutorHandle, SpawnError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let pid = child.id();
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let kill = CancellationToken::new();

        if let Some(stdout) = child.stdout.take() {
            forward_stream(stdout, "stdout", out_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_stream(stderr, "stderr", out_tx);
        }

        let kill_for_waiter = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_for_waiter.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let outcome = match status {
                Ok(status) => ExitOutcome {
                    code: status.code(),
                    signal: exit_signal(&status),
                },
                Err(_) => ExitOutcome {
                    code: None,
                    signal: None,
                },
            };
            let _ = exit_tx.send(outcome);
        });

        Ok(ExecutorHandle {
            pid,
            output: out_rx,
            exit: exit_rx,
            kill,
        })
    }
}

/// Forwards one pipe as tagged chunks until EOF.
fn forward_stream<R>(mut reader: R, stream: &'static str, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        stream,
                        text: String::from_utf8_lossy(&buf[..n]).into_owned(),
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(spec: ExecSpec) -> (Vec<OutputChunk>, ExitOutcome) {
        let mut handle = ProcessSpawner.spawn(spec).await.unwrap();
        let mut chunks = Vec::new();
        let outcome = loop {
            tokio::select! {
                chunk = handle.output.recv() => {
                    if let Some(chunk) = chunk {
                        chunks.push(chunk);
                    }
                }
                outcome = &mut handle.exit => break outcome.unwrap(),
            }
        };
        while let Ok(chunk) = handle.output.try_recv() {
            chunks.push(chunk);
        }
        (chunks, outcome)
    }

    #[tokio::test]
    async fn captures_stdout_and_clean_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let (chunks, outcome) = run(ExecSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "printf hello".into()],
            cwd: tmp.path().to_path_buf(),
        })
        .await;

        assert!(outcome.success());
        let stdout: String = chunks
            .iter()
            .filter(|c| c.stream == "stdout")
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(stdout, "hello");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, outcome) = run(ExecSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
            cwd: tmp.path().to_path_buf(),
        })
        .await;
        assert!(!outcome.success());
        assert_eq!(outcome.code, Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ProcessSpawner
            .spawn(ExecSpec {
                program: "definitely-not-a-real-binary-7f3a".into(),
                args: vec![],
                cwd: tmp.path().to_path_buf(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "spawn_failed");
    }

    #[tokio::test]
    async fn kill_token_terminates_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let mut handle = ProcessSpawner
            .spawn(ExecSpec {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 30".into()],
                cwd: tmp.path().to_path_buf(),
            })
            .await
            .unwrap();

        handle.kill.cancel();
        let outcome = (&mut handle.exit).await.unwrap();
        assert!(!outcome.success());
        assert!(outcome.code.is_none() || outcome.code != Some(0));
    }
}
