// Module: Process lifecycle manager (PLM)
// Owns every child process spawned by any driver. Process-group capture,
// two-phase TERM-then-KILL shutdown, and the dedicated-reader-thread
// bridging pattern are grounded in other_examples' mike-lead-maestro
// `ProcessManager` (PTY-specific there; generalized here to any spawned
// command). The teacher has no process-management module at all — every
// HTTP/wait executor runs in-process.

pub mod signals;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::errors::{ErrorCode, OrchestratorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(i32),
    Killed,
}

/// Options accepted by `start`.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

/// Emitted on the process event channel. Never thrown back into the
/// caller from inside an async handler — failures become `Error` events.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { pid: u32 },
    Exited { pid: u32, code: Option<i32> },
    Killed { pid: u32 },
    Error { pid: Option<u32>, message: String },
}

pub struct ProcessHandle {
    pub pid: u32,
}

struct Entry {
    child: Mutex<Option<Child>>,
    #[cfg(unix)]
    pgid: i32,
    status: Mutex<ProcessStatus>,
    /// Combined stdout+stderr captured so far, for drivers (e.g. CLI) that
    /// need to inspect a command's output rather than just its exit code.
    output: Arc<Mutex<String>>,
}

struct Inner {
    processes: DashMap<u32, Entry>,
    shutting_down: AtomicBool,
    shutdown_once: Mutex<bool>,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

/// Tracks and reaps every process any driver spawns. Cheaply cloneable
/// (`Arc` inside); a single instance should be shared process-wide so
/// `shutdown()` is a true singleton operation.
#[derive(Clone)]
pub struct ProcessLifecycleManager {
    inner: Arc<Inner>,
}

impl ProcessLifecycleManager {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mgr = Self {
            inner: Arc::new(Inner {
                processes: DashMap::new(),
                shutting_down: AtomicBool::new(false),
                shutdown_once: Mutex::new(false),
                events: tx,
            }),
        };
        (mgr, rx)
    }

    /// Spawns `cmd` detached in its own process group (group ID equals the
    /// child PID on Unix). Refuses new starts once `shutdown()` has run.
    pub async fn start(&self, cmd: &str, args: &[String], opts: SpawnOptions) -> Result<ProcessHandle, OrchestratorError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::usage(
                ErrorCode::UNSUPPORTED_ACTION,
                "process lifecycle manager is shutting down, refusing new starts",
            ));
        }

        let mut command = Command::new(cmd);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }
        for (k, v) in &opts.env {
            command.env(k, v);
        }

        #[cfg(unix)]
        {
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| OrchestratorError::fatal(ErrorCode::SPAWN_FAILED, format!("failed to spawn '{cmd}': {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| OrchestratorError::fatal(ErrorCode::SPAWN_FAILED, "spawned child has no pid"))?;

        #[cfg(unix)]
        let pgid = pid as i32;

        let output = Arc::new(Mutex::new(String::new()));
        if let Some(mut stdout) = child.stdout.take() {
            let buf = output.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.lock().await.push_str(&String::from_utf8_lossy(&chunk[..n])),
                    }
                }
            });
        }
        if let Some(mut stderr) = child.stderr.take() {
            let buf = output.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.lock().await.push_str(&String::from_utf8_lossy(&chunk[..n])),
                    }
                }
            });
        }

        self.inner.processes.insert(
            pid,
            Entry {
                child: Mutex::new(Some(child)),
                #[cfg(unix)]
                pgid,
                status: Mutex::new(ProcessStatus::Running),
                output,
            },
        );

        let _ = self.inner.events.send(ProcessEvent::Started { pid });
        Ok(ProcessHandle { pid })
    }

    /// Snapshots the combined stdout+stderr captured for `pid` so far.
    pub async fn output(&self, pid: u32) -> Result<String, OrchestratorError> {
        let entry = self
            .inner
            .processes
            .get(&pid)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no tracked process {pid}")))?;
        Ok(entry.output.lock().await.clone())
    }

    /// Writes to `pid`'s stdin, e.g. for a `execute_with_input` step.
    pub async fn write_stdin(&self, pid: u32, data: &[u8]) -> Result<(), OrchestratorError> {
        let entry = self
            .inner
            .processes
            .get(&pid)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no tracked process {pid}")))?;
        let mut guard = entry.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("process {pid} has no owned stdin")));
        };
        let Some(stdin) = child.stdin.as_mut() else {
            return Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("process {pid} stdin already closed")));
        };
        stdin
            .write_all(data)
            .await
            .map_err(|e| OrchestratorError::transient_io(format!("write to stdin of {pid} failed: {e}")))
    }

    /// Closes `pid`'s stdin so a reader blocked on EOF can proceed, e.g.
    /// after `execute_with_input` has written its one-shot input.
    pub async fn close_stdin(&self, pid: u32) -> Result<(), OrchestratorError> {
        let entry = self
            .inner
            .processes
            .get(&pid)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no tracked process {pid}")))?;
        if let Some(child) = entry.child.lock().await.as_mut() {
            child.stdin.take();
        }
        Ok(())
    }

    /// Sends `signal` (Unix signal name, defaulting to TERM) to the
    /// process's *group*, not just the leader.
    pub fn kill(&self, pid: u32, signal: &str) -> bool {
        #[cfg(unix)]
        {
            let Some(entry) = self.inner.processes.get(&pid) else {
                return false;
            };
            let sig = match signal.to_uppercase().as_str() {
                "KILL" | "SIGKILL" => libc::SIGKILL,
                _ => libc::SIGTERM,
            };
            let result = unsafe { libc::kill(-entry.pgid, sig) };
            if result == 0 {
                if let Ok(mut status) = entry.status.try_lock() {
                    *status = ProcessStatus::Killed;
                }
                let _ = self.inner.events.send(ProcessEvent::Killed { pid });
                true
            } else {
                let _ = self.inner.events.send(ProcessEvent::Error {
                    pid: Some(pid),
                    message: format!("kill({pid}, {signal}) failed: {}", std::io::Error::last_os_error()),
                });
                false
            }
        }
        #[cfg(windows)]
        {
            let _ = (pid, signal);
            false
        }
    }

    /// Sends `signal` to every currently tracked process.
    pub fn kill_all(&self, signal: &str) {
        let pids: Vec<u32> = self.inner.processes.iter().map(|e| *e.key()).collect();
        for pid in pids {
            self.kill(pid, signal);
        }
    }

    /// Waits for `pid` to exit, optionally bounded by `timeout`.
    pub async fn wait_for(&self, pid: u32, timeout: Option<Duration>) -> Result<ProcessStatus, OrchestratorError> {
        let entry = self
            .inner
            .processes
            .get(&pid)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no tracked process {pid}")))?;

        let mut guard = entry.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(*entry.status.lock().await);
        };

        let wait_fut = child.wait();
        let result = match timeout {
            Some(d) => tokio::time::timeout(d, wait_fut)
                .await
                .map_err(|_| OrchestratorError::timeout(ErrorCode::ATTEMPT_TIMEOUT, format!("waitFor({pid}) timed out")))?,
            None => wait_fut.await,
        };

        match result {
            Ok(exit_status) => {
                let code = exit_status.code();
                *entry.status.lock().await = ProcessStatus::Exited(code.unwrap_or(-1));
                let _ = self.inner.events.send(ProcessEvent::Exited { pid, code });
                Ok(ProcessStatus::Exited(code.unwrap_or(-1)))
            }
            Err(e) => Err(OrchestratorError::transient_io(format!("wait({pid}) failed: {e}"))),
        }
    }

    /// Non-blocking check: `Some(status)` once `pid` has exited, `None`
    /// while it is still running. Lets callers poll output between checks
    /// instead of blocking inside `wait_for` for the whole run.
    pub async fn try_wait(&self, pid: u32) -> Result<Option<ProcessStatus>, OrchestratorError> {
        let entry = self
            .inner
            .processes
            .get(&pid)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no tracked process {pid}")))?;

        let mut guard = entry.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(Some(*entry.status.lock().await));
        };

        match child.try_wait() {
            Ok(Some(exit_status)) => {
                let code = exit_status.code();
                *entry.status.lock().await = ProcessStatus::Exited(code.unwrap_or(-1));
                let _ = self.inner.events.send(ProcessEvent::Exited { pid, code });
                Ok(Some(ProcessStatus::Exited(code.unwrap_or(-1))))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OrchestratorError::transient_io(format!("try_wait({pid}) failed: {e}"))),
        }
    }

    /// Idempotent. TERMs every tracked process, waits `timeout/2`, KILLs
    /// survivors, waits the remaining half, then marks the manager as
    /// closed to new `start()` calls.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let mut guard = self.inner.shutdown_once.lock().await;
        if *guard {
            return 0;
        }
        *guard = true;
        drop(guard);

        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let half = timeout / 2;

        self.kill_all("TERM");
        tokio::time::sleep(half).await;

        let survivors: Vec<u32> = self
            .inner
            .processes
            .iter()
            .filter(|e| matches!(*e.status.try_lock().map(|s| *s).unwrap_or(ProcessStatus::Running), ProcessStatus::Running))
            .map(|e| *e.key())
            .collect();
        for pid in &survivors {
            self.kill(*pid, "KILL");
        }
        tokio::time::sleep(half).await;

        let reaped = self.inner.processes.len();
        self.inner.processes.clear();
        reaped
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.processes.len()
    }

    /// Registers a process the PLM did not itself spawn (e.g. a PTY-bound
    /// child spawned via `portable_pty`) so that `kill_all`/`shutdown`
    /// still reach it. The PLM has no `Child` handle for it and so cannot
    /// `wait_for` it directly; the registering owner remains responsible
    /// for reaping its own handle.
    #[cfg(unix)]
    pub fn register_external(&self, pid: u32, pgid: i32) {
        self.inner.processes.insert(
            pid,
            Entry {
                child: Mutex::new(None),
                pgid,
                status: Mutex::new(ProcessStatus::Running),
                output: Arc::new(Mutex::new(String::new())),
            },
        );
    }

    /// Drops the bookkeeping entry for a process the owner has already
    /// reaped itself (e.g. `PtySessionManager::destroy_session`).
    pub fn forget(&self, pid: u32) {
        self.inner.processes.remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_tracks_a_running_process() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let handle = plm.start("sleep", &["1".to_string()], SpawnOptions::default()).await.unwrap();
        assert!(handle.pid > 0);
        assert_eq!(plm.tracked_count(), 1);
        plm.kill(handle.pid, "KILL");
        let _ = plm.wait_for(handle.pid, Some(Duration::from_secs(2))).await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let _ = plm.start("sleep", &["1".to_string()], SpawnOptions::default()).await.unwrap();
        let first = plm.shutdown(Duration::from_millis(200)).await;
        let second = plm.shutdown(Duration::from_millis(200)).await;
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn start_refuses_after_shutdown() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        plm.shutdown(Duration::from_millis(100)).await;
        let result = plm.start("sleep", &["1".to_string()], SpawnOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn output_captures_stdout() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let handle = plm
            .start("sh", &["-c".to_string(), "echo hello".to_string()], SpawnOptions::default())
            .await
            .unwrap();
        let _ = plm.wait_for(handle.pid, Some(Duration::from_secs(2))).await.unwrap();
        // Give the reader task a moment to drain after the pipe's EOF.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let output = plm.output(handle.pid).await.unwrap();
        assert!(output.contains("hello"));
    }
}
