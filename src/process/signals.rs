// Global process-wide signal/exit hooks for the PLM, installed exactly
// once regardless of how many `ProcessLifecycleManager` instances exist
// in-process. Grounded in SPEC_FULL.md §4.C's "Global hooks" contract;
// no teacher counterpart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::{error, warn};

use super::ProcessLifecycleManager;

static HOOKS_INSTALLED: AtomicBool = AtomicBool::new(false);
static PANIC_PLM: OnceLock<ProcessLifecycleManager> = OnceLock::new();

/// Installs SIGINT/SIGTERM handling and a panic hook that triggers a fast
/// shutdown, plus a best-effort exit-time kill-all. Idempotent: calling
/// this more than once (e.g. from multiple PLM instances in tests) is a
/// no-op after the first call.
pub fn install_global_hooks(plm: ProcessLifecycleManager) {
    if HOOKS_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let _ = PANIC_PLM.set(plm.clone());
    install_panic_hook();

    tokio::spawn(async move {
        wait_for_termination_signal().await;
        let reaped = plm.shutdown(Duration::from_secs(5)).await;
        tracing::info!(reaped, "cleanupComplete");
        std::process::exit(0);
    });
}

async fn wait_for_termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Realizes the spec's "uncaught exception / unhandled rejection" handler
/// in Rust terms: any panic in a spawned task triggers the same fast
/// `shutdown(1000ms)` path before the default panic behavior continues.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        if let Some(plm) = PANIC_PLM.get() {
            let plm = plm.clone();
            // Best-effort: the panicking thread may not have a tokio runtime
            // handle; if one exists, drive the fast shutdown synchronously.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    plm.shutdown(Duration::from_millis(1000)).await;
                    error!("fast shutdown after panic complete");
                    std::process::exit(1);
                });
            } else {
                warn!("panic occurred outside a tokio runtime; skipping PLM fast shutdown");
            }
        }
    }));
}
