//! Bundle removal at the end of a run.
//!
//! [`CleanupGuard`] removes every bundle in its directory when dropped, when
//! the process receives SIGINT or SIGTERM, and when a panic unwinds through
//! the hook. A hard kill bypasses all three and leaves encrypted residue that
//! is useless without the run's key.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::list_bundles;

static PANIC_HOOK: Once = Once::new();

/// Directories with a live guard, swept by the panic hook.
static ARMED: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Delete all bundle files in `dir`. Returns how many were removed.
pub fn remove_bundles(dir: &Path) -> usize {
    let mut removed = 0;
    for path in list_bundles(dir) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed secure bundle");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove secure bundle"),
        }
    }
    removed
}

fn armed() -> std::sync::MutexGuard<'static, BTreeSet<PathBuf>> {
    ARMED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes bundles on drop, signal or panic.
#[derive(Debug)]
pub struct CleanupGuard {
    dir: PathBuf,
    signals: Option<JoinHandle<()>>,
}

impl CleanupGuard {
    /// Arm cleanup for `dir`.
    ///
    /// Must be called inside a tokio runtime. Signal handlers are registered
    /// before this returns; the listener runs as a background task.
    pub fn install(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();

        PANIC_HOOK.call_once(|| {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                for dir in armed().iter() {
                    remove_bundles(dir);
                }
                previous(info);
            }));
        });
        armed().insert(dir.clone());

        let signals = match Signals::register() {
            Ok(signals) => {
                let signal_dir = dir.clone();
                Some(tokio::spawn(async move {
                    let code = signals.recv().await;
                    let removed = remove_bundles(&signal_dir);
                    info!(removed, "interrupted, cleaned up secure bundles");
                    std::process::exit(code);
                }))
            }
            Err(e) => {
                warn!(error = %e, "failed to install signal handlers");
                None
            }
        };

        Self { dir, signals }
    }

    /// Remove bundles now. Safe to call more than once.
    pub fn cleanup(&self) -> usize {
        remove_bundles(&self.dir)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(task) = self.signals.take() {
            task.abort();
        }
        armed().remove(&self.dir);
        let removed = self.cleanup();
        if removed > 0 {
            debug!(removed, "cleaned up secure bundles");
        }
    }
}

/// SIGINT and SIGTERM listeners.
#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolve with the conventional exit code for the received signal.
    async fn recv(mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => 130,
            _ = self.terminate.recv() => 143,
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> i32 {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        130
    }
}
