//! Modules directory watcher for hot-reload (development only).
//!
//! Filesystem events under the modules root are coalesced: a reload request
//! is emitted once the directory has been quiet for the debounce window, and
//! at most one request is ever queued.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::HostResult;

/// Keeps the underlying watcher alive; dropping it stops the reload requests.
pub struct ModuleWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ModuleWatcher {
    /// Watch `root` recursively, skipping events that only touch paths under
    /// `ignored`. Must be called inside a Tokio runtime.
    pub fn spawn(
        root: &Path,
        ignored: Vec<PathBuf>,
        debounce: Duration,
    ) -> HostResult<(Self, mpsc::Receiver<()>)> {
        let ignored: Vec<PathBuf> = ignored
            .into_iter()
            .map(|p| p.canonicalize().unwrap_or(p))
            .collect();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event, &ignored) => {
                let _ = raw_tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!("Module watcher error: {}", e),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("Watching {:?} for module changes", root);

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(debounce_events(raw_rx, tx, debounce));
        Ok((
            Self {
                _watcher: watcher,
                task,
            },
            rx,
        ))
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ModuleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleWatcher").finish_non_exhaustive()
    }
}

fn is_relevant(event: &Event, ignored: &[PathBuf]) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| !ignored.iter().any(|dir| path.starts_with(dir)))
}

async fn debounce_events(
    mut raw: mpsc::UnboundedReceiver<()>,
    requests: mpsc::Sender<()>,
    window: Duration,
) {
    while raw.recv().await.is_some() {
        loop {
            match tokio::time::timeout(window, raw.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        match requests.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => return,
        }
    }
}
