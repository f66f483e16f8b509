use std::time::Duration;

use agentmesh::error::StatusError;
use agentmesh::status::{
    AgentOutputWriter, AgentState, AgentStatusRecord, RecentAction, StatusEvent,
    StatusSynchronizer,
};
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::broadcast;

const SCAN: Duration = Duration::from_millis(100);

const HAND_WRITTEN: &str = "\
# Agent Status: coder

**Last Updated**: 2026-02-04T10:00:00.000Z
**Status**: BUSY

## Current Activity
- **Task**: Implement checkout flow
- **Progress**: 42%
- **Dependencies**: pm-agent, tester-agent

## Recent Actions
- No recent actions

## Metrics
- **Tasks Completed**: 0
- **Uptime**: 120s
- **Error Count**: 0
";

fn writer_for(tmp: &TempDir, agent: &str, agent_type: &str) -> AgentOutputWriter {
    AgentOutputWriter::new(
        agent,
        agent_type,
        tmp.path().join("workspaces").join(agent),
        tmp.path().join("shared"),
        Duration::from_secs(60),
    )
}

/// Wait for the first event matching `pred`, failing after a few seconds.
async fn wait_for_event<F>(events: &mut broadcast::Receiver<StatusEvent>, pred: F) -> StatusEvent
where
    F: Fn(&StatusEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for status event")
}

#[tokio::test]
async fn test_writer_to_synchronizer_round_trip() {
    let tmp = TempDir::new().unwrap();
    let writer = writer_for(&tmp, "reviewer-agent", "reviewer");
    writer.start();

    let mut record = AgentStatusRecord::new("reviewer");
    record.status = AgentState::Blocked;
    record.current_activity.task = Some("Review PR #31".to_string());
    record.set_progress(80);
    record.set_dependencies(["coder-agent", "tester-agent"]);
    record.push_action("Requested changes");
    record.push_action("Waiting on fixes");
    record.metrics.tasks_completed = 4;
    record.metrics.uptime_seconds = 900;
    record.metrics.error_count = 2;
    writer.update_status(record.clone());

    let mut sync = StatusSynchronizer::new(tmp.path().join("shared"), SCAN);
    sync.start().await.unwrap();

    let seen = sync.get_agent_status("reviewer-agent").expect("status should be discovered");
    assert_eq!(seen.status, record.status);
    assert_eq!(seen.current_activity, record.current_activity);
    assert_eq!(seen.recent_actions, record.recent_actions);
    assert_eq!(seen.metrics, record.metrics);

    sync.stop().await;
    writer.stop().await;
}

#[tokio::test]
async fn test_sub_millisecond_timestamps_round_trip() {
    let tmp = TempDir::new().unwrap();
    let writer = writer_for(&tmp, "pm-agent", "pm");
    writer.start();

    let mut record = AgentStatusRecord::new("pm");
    record.last_updated = Utc::now();
    record.recent_actions.push(RecentAction {
        timestamp: Utc::now(),
        action: "Planned sprint 3".to_string(),
    });
    writer.update_status(record);
    let published = writer.current_status();

    let mut sync = StatusSynchronizer::new(tmp.path().join("shared"), SCAN);
    sync.start().await.unwrap();

    let seen = sync.get_agent_status("pm-agent").unwrap();
    assert_eq!(seen.last_updated, published.last_updated);
    assert_eq!(seen.recent_actions, published.recent_actions);
    assert_eq!(seen, published);

    sync.stop().await;
    writer.stop().await;
}

#[tokio::test]
async fn test_hand_written_status_file() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("coder-agent-status.md"), HAND_WRITTEN).unwrap();

    let mut sync = StatusSynchronizer::new(tmp.path(), SCAN);
    sync.start().await.unwrap();

    let status = sync.get_agent_status("coder-agent").unwrap();
    assert_eq!(status.status, AgentState::Busy);
    assert_eq!(status.current_activity.progress, 42);
    assert_eq!(status.current_activity.dependencies, vec!["pm-agent", "tester-agent"]);
    assert!(status.recent_actions.is_empty());
    assert_eq!(status.metrics.uptime_seconds, 120);
    sync.stop().await;
}

#[tokio::test]
async fn test_corrupt_file_does_not_hide_others() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("coder-agent-status.md"), HAND_WRITTEN).unwrap();
    std::fs::write(
        tmp.path().join("broken-agent-status.md"),
        "# Agent Status: pm\n\n**Status**: SOMEWHERE\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("README.md"), "not a status file").unwrap();

    let mut sync = StatusSynchronizer::new(tmp.path(), SCAN);
    sync.start().await.unwrap();

    let all = sync.get_all_agent_statuses();
    assert_eq!(all.len(), 1);
    assert!(all.contains_key("coder-agent"));
    assert!(sync.get_agent_status("broken-agent").is_none());
    sync.stop().await;
}

#[tokio::test]
async fn test_created_then_updated_events() {
    let tmp = TempDir::new().unwrap();
    let shared = tmp.path().join("shared");

    let mut sync = StatusSynchronizer::new(&shared, SCAN);
    let mut events = sync.subscribe();
    sync.start().await.unwrap();

    let writer = writer_for(&tmp, "tester-agent", "tester");
    writer.start();
    let created = wait_for_event(&mut events, |e| e.agent_id() == "tester-agent").await;
    assert!(matches!(created, StatusEvent::Created { .. }));

    writer.apply(|r| {
        r.status = AgentState::Busy;
        r.current_activity.task = Some("Run regression suite".to_string());
    });
    let updated = wait_for_event(&mut events, |e| {
        matches!(e, StatusEvent::Updated { status, .. } if status.status == AgentState::Busy)
    })
    .await;
    assert_eq!(
        updated.status().current_activity.task.as_deref(),
        Some("Run regression suite")
    );
    assert_eq!(sync.get_agent_status("tester-agent").unwrap().status, AgentState::Busy);

    sync.stop().await;
    writer.stop().await;
}

#[tokio::test]
async fn test_periodic_scan_picks_up_changes() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("pm-agent-status.md");
    std::fs::write(&path, HAND_WRITTEN.replace("BUSY", "IDLE")).unwrap();

    let mut sync = StatusSynchronizer::new(tmp.path(), SCAN);
    let mut events = sync.subscribe();
    sync.start().await.unwrap();
    assert_eq!(sync.get_agent_status("pm-agent").unwrap().status, AgentState::Idle);

    std::fs::write(&path, HAND_WRITTEN.replace("BUSY", "ERROR")).unwrap();
    wait_for_event(&mut events, |e| e.status().status == AgentState::Error).await;
    assert_eq!(sync.get_agent_status("pm-agent").unwrap().status, AgentState::Error);
    sync.stop().await;
}

#[tokio::test]
async fn test_scan_only_observation() {
    let tmp = TempDir::new().unwrap();
    let mut sync = StatusSynchronizer::new(tmp.path(), SCAN).without_native_watch();
    let mut events = sync.subscribe();
    sync.start().await.unwrap();
    assert!(sync.is_running());
    assert!(!sync.is_watching());

    std::fs::write(tmp.path().join("coder-agent-status.md"), HAND_WRITTEN).unwrap();
    let created = wait_for_event(&mut events, |e| e.agent_id() == "coder-agent").await;
    assert!(matches!(created, StatusEvent::Created { .. }));
    assert_eq!(sync.get_agent_status("coder-agent").unwrap().status, AgentState::Busy);
    sync.stop().await;
}

#[tokio::test]
async fn test_start_creates_missing_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("a").join("b").join("status");

    let mut sync = StatusSynchronizer::new(&dir, SCAN);
    sync.start().await.unwrap();
    assert!(dir.is_dir());
    assert!(sync.get_all_agent_statuses().is_empty());
    sync.stop().await;
}

#[tokio::test]
async fn test_start_fails_when_directory_cannot_be_created() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("plain-file");
    std::fs::write(&file, "x").unwrap();

    let mut sync = StatusSynchronizer::new(file.join("status"), SCAN);
    let err = sync.start().await.unwrap_err();
    assert!(matches!(err, StatusError::Io { .. }));
    assert!(!sync.is_running());
}

#[tokio::test]
async fn test_stop_ends_observation() {
    let tmp = TempDir::new().unwrap();
    let mut sync = StatusSynchronizer::new(tmp.path(), SCAN);
    sync.start().await.unwrap();
    sync.stop().await;
    assert!(!sync.is_running());

    std::fs::write(tmp.path().join("late-agent-status.md"), HAND_WRITTEN).unwrap();
    tokio::time::sleep(SCAN * 3).await;
    assert!(sync.get_agent_status("late-agent").is_none());
}
