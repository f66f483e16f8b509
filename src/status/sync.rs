//! Observer for the shared status directory.
//!
//! Two producers feed one ingest routine: a native directory watch (`notify`)
//! and a periodic full re-scan that catches anything the platform watcher
//! missed. Ingest re-parses the whole file and replaces the snapshot for that
//! agent id, so both producers can report the same file without conflict.
//!
//! The synchronizer only ever reads from the directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::document::{agent_id_from_path, parse_status_document};
use super::types::AgentStatusRecord;
use crate::error::StatusError;

/// Default period of the backstop re-scan.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10);

const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(10);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notification for one agent's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// First successful parse of this agent id.
    Created {
        agent_id: String,
        status: AgentStatusRecord,
    },
    /// Any later successful parse, whether or not the content changed.
    Updated {
        agent_id: String,
        status: AgentStatusRecord,
    },
}

impl StatusEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            StatusEvent::Created { agent_id, .. } | StatusEvent::Updated { agent_id, .. } => agent_id,
        }
    }

    pub fn status(&self) -> &AgentStatusRecord {
        match self {
            StatusEvent::Created { status, .. } | StatusEvent::Updated { status, .. } => status,
        }
    }
}

struct SyncState {
    statuses: Mutex<HashMap<String, AgentStatusRecord>>,
    events: broadcast::Sender<StatusEvent>,
}

impl SyncState {
    /// Re-read one file and merge it. Unrelated, vanished and malformed
    /// files leave the snapshot untouched.
    async fn ingest(&self, path: &Path) {
        let Some(agent_id) = agent_id_from_path(path) else {
            return;
        };

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(agent_id, "Status file vanished before it could be read");
                return;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read status file: {e}");
                return;
            }
        };

        let status = match parse_status_document(&text) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring malformed status file: {e}");
                return;
            }
        };

        let event = {
            let mut statuses = self.statuses.lock().unwrap();
            let existed = statuses.insert(agent_id.clone(), status.clone()).is_some();
            if existed {
                StatusEvent::Updated { agent_id, status }
            } else {
                StatusEvent::Created { agent_id, status }
            }
        };

        tracing::debug!(
            agent_id = %event.agent_id(),
            status = %event.status().status,
            created = matches!(event, StatusEvent::Created { .. }),
            "Status snapshot refreshed"
        );
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn scan(&self, dir: &Path) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), "Failed to scan status directory: {e}");
                return;
            }
        };

        let mut paths = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => paths.push(entry.path()),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), "Status directory scan interrupted: {e}");
                    break;
                }
            }
        }
        paths.sort();

        for path in paths {
            self.ingest(&path).await;
        }
    }
}

struct Running {
    // Dropping the watcher closes the native watch. `None` means scan-only.
    watcher: Option<RecommendedWatcher>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Keeps the latest parsed status of every agent publishing into a directory.
pub struct StatusSynchronizer {
    dir: PathBuf,
    scan_interval: Duration,
    native_watch: bool,
    state: Arc<SyncState>,
    running: Option<Running>,
}

impl StatusSynchronizer {
    pub fn new(dir: impl Into<PathBuf>, scan_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            dir: dir.into(),
            scan_interval: scan_interval.max(MIN_SCAN_INTERVAL),
            native_watch: true,
            state: Arc::new(SyncState {
                statuses: Mutex::new(HashMap::new()),
                events,
            }),
            running: None,
        }
    }

    /// Observe through the periodic re-scan only, without a platform watch.
    pub fn without_native_watch(mut self) -> Self {
        self.native_watch = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Receive change events. Subscribing before [`start`](Self::start)
    /// also delivers the `Created` events of the initial scan.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.state.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Whether a platform change watch is active on top of the re-scan.
    pub fn is_watching(&self) -> bool {
        self.running.as_ref().is_some_and(|r| r.watcher.is_some())
    }

    /// Create the directory if needed, scan it, then keep watching.
    ///
    /// Failing to create the directory is an error; the directory is a hard
    /// dependency of the observer. A native watch that cannot be armed is
    /// logged and the re-scan carries on alone. Calling it again while running
    /// is a no-op.
    pub async fn start(&mut self) -> Result<(), StatusError> {
        if self.running.is_some() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StatusError::Io {
                path: self.dir.clone(),
                source,
            })?;

        self.state.scan(&self.dir).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let watcher = if self.native_watch {
            match watch_dir(&self.dir, tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!("{e}; falling back to periodic scans");
                    None
                }
            }
        } else {
            None
        };

        let cancel = CancellationToken::new();

        let events_task = {
            let state = self.state.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        path = rx.recv() => match path {
                            Some(path) => state.ingest(&path).await,
                            None => break,
                        },
                    }
                }
            })
        };

        let scan_task = {
            let state = self.state.clone();
            let cancel = cancel.clone();
            let dir = self.dir.clone();
            let period = self.scan_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The initial scan already ran.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => state.scan(&dir).await,
                    }
                }
            })
        };

        self.running = Some(Running {
            watcher,
            cancel,
            tasks: vec![events_task, scan_task],
        });

        tracing::info!(
            path = %self.dir.display(),
            watching = self.is_watching(),
            agents = self.state.statuses.lock().unwrap().len(),
            scan_interval_ms = self.scan_interval.as_millis() as u64,
            "Status synchronizer started"
        );
        Ok(())
    }

    /// Latest snapshot for one agent.
    pub fn get_agent_status(&self, agent_id: &str) -> Option<AgentStatusRecord> {
        self.state.statuses.lock().unwrap().get(agent_id).cloned()
    }

    /// Latest snapshot of every agent seen so far.
    pub fn get_all_agent_statuses(&self) -> HashMap<String, AgentStatusRecord> {
        self.state.statuses.lock().unwrap().clone()
    }

    /// Close the watch and wait for in-flight ingestion to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        drop(running.watcher);
        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Status synchronizer task ended abnormally: {e}");
            }
        }
        tracing::info!(path = %self.dir.display(), "Status synchronizer stopped");
    }
}

/// Arm a native watch on `dir`, forwarding changed paths to `tx`.
fn watch_dir(dir: &Path, tx: mpsc::UnboundedSender<PathBuf>) -> Result<RecommendedWatcher, StatusError> {
    let watch_error = |e: notify::Error| StatusError::Watch {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any) {
                for path in event.paths {
                    // Receiver gone means we are shutting down.
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => tracing::warn!("Status directory watch error: {e}"),
    })
    .map_err(watch_error)?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(watch_error)?;
    Ok(watcher)
}

impl Drop for StatusSynchronizer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
