//! Publishes one agent's status document.
//!
//! The document is written to the agent's private workspace as `status.md`
//! and mirrored to `<shared_dir>/<agent_name>-status.md`, where any
//! [`StatusSynchronizer`](super::sync::StatusSynchronizer) can pick it up.
//!
//! Publication is best-effort: every filesystem failure is logged and
//! swallowed so a full disk or a missing mount never takes the agent down.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::document::{render_status_document, status_file_name};
use super::types::AgentStatusRecord;

/// Default period of the background re-render.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest accepted publish period.
const MIN_PUBLISH_INTERVAL: Duration = Duration::from_millis(10);

/// Name of the private copy inside the agent workspace.
pub const WORKSPACE_STATUS_FILE: &str = "status.md";

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct WriterInner {
    agent_name: String,
    workspace: PathBuf,
    shared_dir: PathBuf,
    interval: Duration,
    started_at: Instant,
    record: Mutex<AgentStatusRecord>,
    ticker: Mutex<Option<Ticker>>,
}

/// Handle to an agent's status publisher. Clones share state.
#[derive(Clone)]
pub struct AgentOutputWriter {
    inner: Arc<WriterInner>,
}

impl AgentOutputWriter {
    pub fn new(
        agent_name: impl Into<String>,
        agent_type: impl Into<String>,
        workspace: impl Into<PathBuf>,
        shared_dir: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                agent_name: agent_name.into(),
                workspace: workspace.into(),
                shared_dir: shared_dir.into(),
                interval: interval.max(MIN_PUBLISH_INTERVAL),
                started_at: Instant::now(),
                record: Mutex::new(AgentStatusRecord::new(agent_type)),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.inner.agent_name
    }

    /// Path of the mirrored document in the shared directory.
    pub fn shared_path(&self) -> PathBuf {
        self.inner.shared_dir.join(status_file_name(&self.inner.agent_name))
    }

    /// Path of the private copy in the agent workspace.
    pub fn workspace_path(&self) -> PathBuf {
        self.inner.workspace.join(WORKSPACE_STATUS_FILE)
    }

    /// Create directories, publish the initial document and start the
    /// periodic re-render. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker.lock().unwrap();
        if ticker.is_some() {
            return;
        }

        for dir in [&self.inner.workspace, &self.inner.shared_dir] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(path = %dir.display(), "Failed to create status directory: {e}");
            }
        }

        self.refresh_and_publish();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(self.clone(), cancel.clone()));
        *ticker = Some(Ticker { cancel, handle });

        tracing::info!(
            agent = %self.inner.agent_name,
            shared = %self.shared_path().display(),
            interval_ms = self.inner.interval.as_millis() as u64,
            "Status publishing started"
        );
    }

    /// Replace the whole record and publish it immediately.
    ///
    /// The record is written as given apart from invariant enforcement
    /// (progress clamp, dependency de-duplication, action cap).
    pub fn update_status(&self, mut record: AgentStatusRecord) {
        record.normalize();
        let mut current = self.inner.record.lock().unwrap();
        *current = record;
        self.publish(&current);
    }

    /// Mutate the record in place, stamp it and publish it immediately.
    pub fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut AgentStatusRecord),
    {
        let mut current = self.inner.record.lock().unwrap();
        f(&mut current);
        current.normalize();
        current.touch();
        current.metrics.uptime_seconds = self.inner.started_at.elapsed().as_secs();
        self.publish(&current);
    }

    /// Snapshot of the record as last published.
    pub fn current_status(&self) -> AgentStatusRecord {
        self.inner.record.lock().unwrap().clone()
    }

    /// Stop the periodic re-render and wait for the ticker task to exit.
    /// Files are left in place; see [`cleanup`](Self::cleanup).
    pub async fn stop(&self) {
        let ticker = self.inner.ticker.lock().unwrap().take();
        if let Some(Ticker { cancel, handle }) = ticker {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(agent = %self.inner.agent_name, "Status ticker ended abnormally: {e}");
            }
            tracing::info!(agent = %self.inner.agent_name, "Status publishing stopped");
        }
    }

    /// Remove the shared mirror so observers stop seeing this agent.
    pub fn cleanup(&self) {
        let path = self.shared_path();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::info!(path = %path.display(), "Removed status mirror"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove status mirror: {e}"),
        }
    }

    fn refresh_and_publish(&self) {
        let mut current = self.inner.record.lock().unwrap();
        current.touch();
        current.metrics.uptime_seconds = self.inner.started_at.elapsed().as_secs();
        self.publish(&current);
    }

    /// Called with the record lock held so concurrent publishers cannot
    /// interleave an older snapshot after a newer one.
    fn publish(&self, record: &AgentStatusRecord) {
        let document = render_status_document(record);
        write_best_effort(&self.workspace_path(), &document);
        write_best_effort(&self.shared_path(), &document);
    }
}

fn write_best_effort(path: &Path, document: &str) {
    if let Err(e) = std::fs::write(path, document) {
        tracing::warn!(path = %path.display(), "Failed to write status document: {e}");
    }
}

async fn run_ticker(writer: AgentOutputWriter, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(writer.inner.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and start() has just published.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => writer.refresh_and_publish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::document::parse_status_document;
    use crate::status::types::AgentState;
    use tempfile::TempDir;

    fn writer_in(tmp: &TempDir, interval: Duration) -> AgentOutputWriter {
        AgentOutputWriter::new(
            "coder-agent",
            "coder",
            tmp.path().join("workspace"),
            tmp.path().join("shared"),
            interval,
        )
    }

    #[tokio::test]
    async fn start_writes_both_copies() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp, Duration::from_secs(60));
        writer.start();

        let shared = std::fs::read_to_string(writer.shared_path()).unwrap();
        let private = std::fs::read_to_string(writer.workspace_path()).unwrap();
        assert_eq!(shared, private);
        assert!(writer.shared_path().ends_with("shared/coder-agent-status.md"));

        let record = parse_status_document(&shared).unwrap();
        assert_eq!(record.status, AgentState::Idle);
        assert_eq!(record.agent_type, "coder");
        writer.stop().await;
    }

    #[tokio::test]
    async fn apply_publishes_immediately() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp, Duration::from_secs(60));
        writer.start();

        writer.apply(|r| {
            r.status = AgentState::Busy;
            r.current_activity.task = Some("Write tests".to_string());
            r.push_action("Started writing tests");
        });

        let record = parse_status_document(&std::fs::read_to_string(writer.shared_path()).unwrap()).unwrap();
        assert_eq!(record.status, AgentState::Busy);
        assert_eq!(record.current_activity.task.as_deref(), Some("Write tests"));
        assert_eq!(record.recent_actions.len(), 1);
        assert_eq!(writer.current_status().status, AgentState::Busy);
        writer.stop().await;
    }

    #[tokio::test]
    async fn ticker_refreshes_last_updated() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp, Duration::from_millis(50));
        writer.start();
        let first = writer.current_status().last_updated;

        tokio::time::sleep(Duration::from_millis(200)).await;
        let on_disk = parse_status_document(&std::fs::read_to_string(writer.shared_path()).unwrap()).unwrap();
        assert!(on_disk.last_updated > first);
        writer.stop().await;
    }

    #[tokio::test]
    async fn unwritable_shared_dir_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let writer = AgentOutputWriter::new(
            "pm-agent",
            "pm",
            tmp.path().join("workspace"),
            blocker.join("shared"),
            Duration::from_secs(60),
        );
        writer.start();
        writer.apply(|r| r.status = AgentState::Error);

        assert!(!writer.shared_path().exists());
        assert_eq!(writer.current_status().status, AgentState::Error);
        assert!(writer.workspace_path().exists());
        writer.stop().await;
    }

    #[tokio::test]
    async fn cleanup_removes_mirror_only() {
        let tmp = TempDir::new().unwrap();
        let writer = writer_in(&tmp, Duration::from_secs(60));
        writer.start();
        writer.stop().await;

        writer.cleanup();
        assert!(!writer.shared_path().exists());
        assert!(writer.workspace_path().exists());
        // Nothing left to remove.
        writer.cleanup();
    }
}
