// Module: PTY session manager
// Spawns shells/processes bound to a pseudo-terminal for the TUI driver.
// Directly grounded in other_examples' mike-lead-maestro
// `ProcessManager`/`Utf8Decoder`: process-group capture via
// `process_group_leader()`, the dedicated-OS-reader-thread-into-bounded-
// channel pattern, and the UTF-8 carry-over decoder for chunk boundaries
// are adapted close to verbatim. Layered on top of the PLM per
// SPEC_FULL.md §4.D so a single `PLM::shutdown()` reaps PTY children too.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use portable_pty::{native_pty_system, Child as PtyChild, CommandBuilder, MasterPty, PtySize};
use tokio::sync::Notify;

use crate::errors::{ErrorCode, OrchestratorError};
use crate::process::ProcessLifecycleManager;

const DEFAULT_BUFFER_LINES: usize = 10_000;

/// Stateful UTF-8 decoder carrying an incomplete trailing byte sequence
/// across chunk reads so a split multibyte character never decodes as a
/// replacement character.
struct Utf8Decoder {
    incomplete: Vec<u8>,
}

impl Utf8Decoder {
    fn new() -> Self {
        Self { incomplete: Vec::with_capacity(4) }
    }

    fn decode(&mut self, input: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.incomplete);
        data.extend_from_slice(input);

        let valid_up_to = match std::str::from_utf8(&data) {
            Ok(_) => data.len(),
            Err(e) => {
                let valid = e.valid_up_to();
                if e.error_len().is_none() {
                    valid
                } else {
                    valid + e.error_len().unwrap_or(1)
                }
            }
        };

        if valid_up_to < data.len() {
            self.incomplete = data[valid_up_to..].to_vec();
        }
        String::from_utf8(data[..valid_up_to].to_vec()).unwrap_or_else(|_| String::from_utf8_lossy(&data[..valid_up_to]).into_owned())
    }
}

/// A rolling, append-only buffer of captured terminal lines. Readers
/// snapshot the slice; the writer evicts the oldest line past capacity.
pub struct OutputBuffer {
    lines: StdMutex<VecDeque<String>>,
    capacity: usize,
}

impl OutputBuffer {
    fn new(capacity: usize) -> Self {
        Self { lines: StdMutex::new(VecDeque::with_capacity(capacity.min(1024))), capacity }
    }

    fn push_chunk(&self, chunk: &str) {
        let mut lines = self.lines.lock().unwrap();
        for line in chunk.split_inclusive('\n') {
            if let Some(last) = lines.back_mut() {
                if !last.ends_with('\n') {
                    last.push_str(line);
                    if lines.len() > self.capacity {
                        lines.pop_front();
                    }
                    continue;
                }
            }
            lines.push_back(line.to_string());
            if lines.len() > self.capacity {
                lines.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn latest_text(&self) -> String {
        self.snapshot().concat()
    }
}

struct PtySession {
    writer: StdMutex<Box<dyn Write + Send>>,
    master: StdMutex<Box<dyn MasterPty + Send>>,
    child: StdMutex<Option<Box<dyn PtyChild + Send + Sync>>>,
    child_pid: u32,
    #[cfg(unix)]
    pgid: i32,
    buffer: Arc<OutputBuffer>,
    shutdown: Arc<Notify>,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
}

/// Creates and tracks PTY-bound child sessions for the TUI driver.
#[derive(Clone)]
pub struct PtySessionManager {
    sessions: Arc<DashMap<u32, PtySession>>,
    next_id: Arc<AtomicU32>,
    most_recent: Arc<AtomicU32>,
    plm: ProcessLifecycleManager,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
    pub env: std::collections::HashMap<String, String>,
}

fn default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_string())
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

impl PtySessionManager {
    pub fn new(plm: ProcessLifecycleManager) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU32::new(1)),
            most_recent: Arc::new(AtomicU32::new(0)),
            plm,
        }
    }

    pub fn create_session(&self, cmd: Option<&str>, args: &[String], opts: SessionOptions) -> Result<u32, OrchestratorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: if opts.rows > 0 { opts.rows } else { 24 },
                cols: if opts.cols > 0 { opts.cols } else { 80 },
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| OrchestratorError::fatal(ErrorCode::PTY_UNAVAILABLE, format!("failed to open PTY: {e}")))?;

        let shell = cmd.map(str::to_string).unwrap_or_else(default_shell);
        let mut builder = CommandBuilder::new(&shell);
        builder.args(args);
        for (k, v) in &opts.env {
            builder.env(k, v);
        }
        if let Some(cwd) = &opts.cwd {
            builder.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| OrchestratorError::fatal(ErrorCode::SPAWN_FAILED, format!("failed to spawn '{shell}': {e}")))?;

        let child_pid = child
            .process_id()
            .ok_or_else(|| OrchestratorError::fatal(ErrorCode::SPAWN_FAILED, "PTY child has no pid"))?;

        #[cfg(unix)]
        let pgid = pair.master.process_group_leader().unwrap_or(child_pid as i32);
        #[cfg(unix)]
        self.plm.register_external(child_pid, pgid);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| OrchestratorError::fatal(ErrorCode::PTY_UNAVAILABLE, format!("failed to take PTY writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| OrchestratorError::fatal(ErrorCode::PTY_UNAVAILABLE, format!("failed to clone PTY reader: {e}")))?;

        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let buffer = Arc::new(OutputBuffer::new(DEFAULT_BUFFER_LINES));
        let buffer_for_thread = buffer.clone();

        let reader_handle = std::thread::Builder::new()
            .name(format!("pty-reader-{id}"))
            .spawn(move || {
                let mut decoder = Utf8Decoder::new();
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let text = decoder.decode(&buf[..n]);
                            if !text.is_empty() {
                                buffer_for_thread.push_chunk(&text);
                            }
                        }
                        Err(e) => {
                            #[cfg(unix)]
                            {
                                let raw = e.raw_os_error().unwrap_or(0);
                                if raw == libc::EAGAIN || raw == libc::EINTR {
                                    continue;
                                }
                            }
                            tracing::debug!(session = id, error = %e, "PTY reader error");
                            break;
                        }
                    }
                }
                shutdown_clone.notify_one();
            })
            .map_err(|e| OrchestratorError::fatal(ErrorCode::SPAWN_FAILED, format!("failed to spawn PTY reader thread: {e}")))?;

        drop(pair.slave);

        self.sessions.insert(
            id,
            PtySession {
                writer: StdMutex::new(writer),
                master: StdMutex::new(pair.master),
                child: StdMutex::new(Some(child)),
                child_pid,
                #[cfg(unix)]
                pgid,
                buffer,
                shutdown,
                reader_handle: StdMutex::new(Some(reader_handle)),
            },
        );
        self.most_recent.store(id, Ordering::SeqCst);
        Ok(id)
    }

    fn session(&self, id: u32) -> Result<dashmap::mapref::one::Ref<'_, u32, PtySession>, OrchestratorError> {
        self.sessions
            .get(&id)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no PTY session {id}")))
    }

    pub fn write(&self, id: u32, bytes: &[u8]) -> Result<(), OrchestratorError> {
        let session = self.session(id)?;
        let mut writer = session.writer.lock().unwrap();
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| OrchestratorError::transient_io(format!("write to session {id} failed: {e}")))
    }

    pub fn write_line(&self, id: u32, text: &str) -> Result<(), OrchestratorError> {
        let mut data = text.as_bytes().to_vec();
        data.push(b'\n');
        self.write(id, &data)
    }

    /// Sends a control character, e.g. `sendControl('C')` → `0x03`.
    pub fn send_control(&self, id: u32, letter: char) -> Result<(), OrchestratorError> {
        let upper = letter.to_ascii_uppercase();
        let code = (upper as u8).wrapping_sub(b'A').wrapping_add(1);
        self.write(id, &[code])
    }

    pub fn resize(&self, id: u32, cols: u16, rows: u16) -> Result<(), OrchestratorError> {
        let session = self.session(id)?;
        let master = session.master.lock().unwrap();
        master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| OrchestratorError::transient_io(format!("resize session {id} failed: {e}")))
    }

    pub fn buffer(&self, id: u32) -> Result<Arc<OutputBuffer>, OrchestratorError> {
        Ok(self.session(id)?.buffer.clone())
    }

    pub fn most_recent_session(&self) -> Result<u32, OrchestratorError> {
        match self.most_recent.load(Ordering::SeqCst) {
            0 => Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "no active PTY session")),
            id => Ok(id),
        }
    }

    /// TERMs the child, waits up to 1s, KILLs if still alive, then removes
    /// the session from the table.
    pub async fn destroy_session(&self, id: u32) -> Result<(), OrchestratorError> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("no PTY session {id}")))?;

        #[cfg(unix)]
        {
            let _ = unsafe { libc::kill(-session.pgid, libc::SIGTERM) };
            let pid = session.child_pid;
            let exited = tokio::time::timeout(Duration::from_secs(1), async {
                loop {
                    if unsafe { libc::kill(pid as i32, 0) } != 0 {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await;
            if exited.is_err() {
                let _ = unsafe { libc::kill(-session.pgid, libc::SIGKILL) };
            }
        }

        session.shutdown.notify_one();
        drop(session.writer);
        drop(session.master);
        self.plm.forget(session.child_pid);

        if let Some(mut child) = session.child.lock().unwrap().take() {
            let _ = child.kill();
        }

        let reader_handle = session.reader_handle.lock().unwrap().take();
        if let Some(handle) = reader_handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        Ok(())
    }

    /// Destroys every tracked session concurrently. Individual failures
    /// are logged, never re-thrown.
    pub async fn cleanup_all(&self) {
        let ids: Vec<u32> = self.sessions.iter().map(|e| *e.key()).collect();
        let futures = ids.into_iter().map(|id| {
            let this = self.clone();
            async move {
                if let Err(e) = this.destroy_session(id).await {
                    tracing::warn!(session = id, error = %e, "failed to destroy PTY session during cleanupAll");
                }
            }
        });
        futures_util::future::join_all(futures).await;
    }
}
