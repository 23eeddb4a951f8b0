//! Deferred removal of finished downloads.
//!
//! A run is handed over once the response body has been released by the
//! transport (fully sent or abandoned by the client). The scheduler waits a
//! short grace period before deleting so no platform still holds the file
//! open, and it never makes the response wait for that.

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::artifact::DownloadRun;

pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct CleanupScheduler {
    delay: Duration,
    tracker: TaskTracker,
}

impl Default for CleanupScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CLEANUP_DELAY)
    }
}

impl CleanupScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tracker: TaskTracker::new(),
        }
    }

    /// Number of deletions still waiting to fire.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Takes ownership of `run` and removes it after the grace delay. Outside
    /// a runtime (e.g. while the process is tearing down) the run is removed
    /// immediately instead.
    pub fn schedule(&self, run: DownloadRun) {
        let Ok(handle) = Handle::try_current() else {
            remove_run(run);
            return;
        };
        let delay = self.delay;
        self.tracker.spawn_on(
            async move {
                tokio::time::sleep(delay).await;
                remove_run(run);
            },
            &handle,
        );
    }

    /// Runs `work` on the runtime as part of the set `shutdown` waits for.
    /// Downloads go through here so an engine run keeps its cleanup even
    /// when the request that started it is gone.
    pub fn track<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(work);
    }

    /// Waits for every tracked download and scheduled deletion to finish. Called on graceful
    /// shutdown; later `schedule` calls still work but are also awaited.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(pending = self.tracker.len(), "waiting for scheduled cleanups");
        }
        self.tracker.wait().await;
    }
}

fn remove_run(run: DownloadRun) {
    let run_id = run.id().to_string();
    let dir = run.dir().to_path_buf();
    match run.remove() {
        Ok(()) => info!(run_id, path = %dir.display(), "cleaned up download"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(run_id, path = %dir.display(), "download already removed")
        }
        Err(err) => warn!(run_id, path = %dir.display(), %err, "failed to clean up download"),
    }
}

/// Removes whatever a previous process left in the downloads directory.
/// Only safe before the server starts accepting requests. Returns how many
/// entries were removed.
pub fn sweep_stale(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return 0,
        Err(err) => {
            warn!(path = %root.display(), %err, "could not scan downloads directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = match entry.file_type() {
            Ok(kind) if kind.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %path.display(), %err, "could not remove stale download"),
        }
    }
    if removed > 0 {
        info!(removed, path = %root.display(), "removed stale downloads");
    }
    removed
}
