//! # Pidfile lock.
//!
//! The pidfile contains the decimal PID of the running supervisor. Presence
//! only means "may be running": the content is checked against a
//! live-process probe before the lock is refused. A pidfile naming a dead
//! process is taken over with a `stale_pidfile` log.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SwarmError;

/// Held pidfile; release it on clean shutdown.
#[derive(Debug)]
pub struct Pidfile {
    path: PathBuf,
    pid: u32,
}

impl Pidfile {
    /// Acquires the pidfile for this process.
    ///
    /// Fails with [`SwarmError::AlreadyRunning`] when the file names a live
    /// process other than ourselves; otherwise the file is (over)written
    /// with our PID.
    pub fn acquire(path: &Path) -> Result<Self, SwarmError> {
        let own_pid = std::process::id();

        if let Ok(contents) = fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse::<i32>() {
                if pid > 0 && pid as u32 != own_pid && process_alive(pid) {
                    return Err(SwarmError::AlreadyRunning { pid });
                }
                tracing::warn!(event = "stale_pidfile", stale_pid = pid, path = %path.display());
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SwarmError::Pidfile {
                path: path.display().to_string(),
                source,
            })?;
        }
        fs::write(path, own_pid.to_string()).map_err(|source| SwarmError::Pidfile {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            pid: own_pid,
        })
    }

    /// Removes the pidfile iff it still names this process.
    pub fn release(self) {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim() == self.pid.to_string() => {
                let _ = fs::remove_file(&self.path);
            }
            _ => {}
        }
    }

    /// Path of the held pidfile.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `pid` refers to a live process.
///
/// `kill(pid, 0)` probes without signalling; `EPERM` still means the process
/// exists.
#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid_and_release_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm.pid");

        let lock = Pidfile::acquire(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn stale_pid_is_taken_over() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm.pid");
        fs::write(&path, "999999999").unwrap();

        let lock = Pidfile::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
        lock.release();
    }

    #[cfg(unix)]
    #[test]
    fn live_pid_refuses_acquisition() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm.pid");
        // PID 1 is always alive on Unix.
        fs::write(&path, "1").unwrap();

        let err = Pidfile::acquire(&path).unwrap_err();
        assert!(matches!(err, SwarmError::AlreadyRunning { pid: 1 }));
    }

    #[test]
    fn release_leaves_foreign_pidfiles_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm.pid");

        let lock = Pidfile::acquire(&path).unwrap();
        // Another process replaced the file after us.
        fs::write(&path, "424242").unwrap();
        lock.release();
        assert!(path.exists());
    }

    #[test]
    fn garbage_contents_are_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("swarm.pid");
        fs::write(&path, "not a pid").unwrap();

        let lock = Pidfile::acquire(&path).unwrap();
        lock.release();
    }
}
