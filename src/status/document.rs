//! Markdown status document: rendering and strict parsing.
//!
//! The layout is fixed. Blank lines are insignificant, every other line must
//! appear in order, and anything that deviates is rejected as a whole rather
//! than partially recorded:
//!
//! ```text
//! # Agent Status: <agentType>
//!
//! **Last Updated**: <ISO-8601 timestamp>
//! **Status**: <IDLE|BUSY|BLOCKED|ERROR>
//!
//! ## Current Activity
//! - **Task**: <task or "None">
//! - **Progress**: <0-100>%
//! - **Dependencies**: <comma-separated list or "None">
//!
//! ## Recent Actions
//! - [<timestamp>] <action text>
//!
//! ## Metrics
//! - **Tasks Completed**: <int>
//! - **Uptime**: <int>s
//! - **Error Count**: <int>
//! ```

use std::fmt::Write as _;
use std::path::Path;

use crate::clock::{format_iso, parse_iso};
use crate::error::StatusError;

use super::types::{
    AgentMetrics, AgentState, AgentStatusRecord, CurrentActivity, RecentAction,
};

/// File name suffix identifying status documents in the shared directory.
pub const STATUS_FILE_SUFFIX: &str = "-status.md";

/// Recent actions rendered into a document, newest last.
pub const RENDERED_ACTIONS: usize = 10;

const NONE_PLACEHOLDER: &str = "None";
const NO_RECENT_ACTIONS: &str = "- No recent actions";

const HEADER: &str = "# Agent Status: ";
const LAST_UPDATED: &str = "**Last Updated**: ";
const STATUS: &str = "**Status**: ";
const CURRENT_ACTIVITY: &str = "## Current Activity";
const TASK: &str = "- **Task**: ";
const PROGRESS: &str = "- **Progress**: ";
const DEPENDENCIES: &str = "- **Dependencies**: ";
const RECENT_ACTIONS: &str = "## Recent Actions";
const METRICS: &str = "## Metrics";
const TASKS_COMPLETED: &str = "- **Tasks Completed**: ";
const UPTIME: &str = "- **Uptime**: ";
const ERROR_COUNT: &str = "- **Error Count**: ";

/// `<agent_name>-status.md`
pub fn status_file_name(agent_name: &str) -> String {
    format!("{agent_name}{STATUS_FILE_SUFFIX}")
}

/// Agent id encoded in a status file path, or `None` for unrelated files.
pub fn agent_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_suffix(STATUS_FILE_SUFFIX)?;
    (!id.is_empty()).then(|| id.to_string())
}

fn one_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Render a record. Output depends only on the record.
pub fn render_status_document(record: &AgentStatusRecord) -> String {
    let mut out = String::new();
    let activity = &record.current_activity;

    let task = activity
        .task
        .as_deref()
        .map(one_line)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| NONE_PLACEHOLDER.to_string());
    let dependencies = if activity.dependencies.is_empty() {
        NONE_PLACEHOLDER.to_string()
    } else {
        one_line(&activity.dependencies.join(", "))
    };

    // Writing to a String cannot fail.
    let _ = writeln!(out, "{HEADER}{}", one_line(&record.agent_type));
    out.push('\n');
    let _ = writeln!(out, "{LAST_UPDATED}{}", format_iso(&record.last_updated));
    let _ = writeln!(out, "{STATUS}{}", record.status);
    out.push('\n');
    let _ = writeln!(out, "{CURRENT_ACTIVITY}");
    let _ = writeln!(out, "{TASK}{task}");
    let _ = writeln!(out, "{PROGRESS}{}%", activity.progress.min(100));
    let _ = writeln!(out, "{DEPENDENCIES}{dependencies}");
    out.push('\n');
    let _ = writeln!(out, "{RECENT_ACTIONS}");
    if record.recent_actions.is_empty() {
        let _ = writeln!(out, "{NO_RECENT_ACTIONS}");
    } else {
        let skip = record.recent_actions.len().saturating_sub(RENDERED_ACTIONS);
        for entry in &record.recent_actions[skip..] {
            let _ = writeln!(out, "- [{}] {}", format_iso(&entry.timestamp), one_line(&entry.action));
        }
    }
    out.push('\n');
    let _ = writeln!(out, "{METRICS}");
    let _ = writeln!(out, "{TASKS_COMPLETED}{}", record.metrics.tasks_completed);
    let _ = writeln!(out, "{UPTIME}{}s", record.metrics.uptime_seconds);
    let _ = writeln!(out, "{ERROR_COUNT}{}", record.metrics.error_count);
    out
}

/// Non-blank lines with their 1-based line numbers.
struct Cursor<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    last_line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_end()))
            .filter(|(_, line)| !line.is_empty())
            .collect();
        Self {
            lines,
            pos: 0,
            last_line: text.lines().count(),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).map(|(_, line)| *line)
    }

    fn next(&mut self, expected: &str) -> Result<(usize, &'a str), StatusError> {
        match self.lines.get(self.pos) {
            Some(&entry) => {
                self.pos += 1;
                Ok(entry)
            }
            None => Err(StatusError::Parse {
                line: self.last_line + 1,
                message: format!("document ends before `{}`", expected.trim()),
            }),
        }
    }

    fn heading(&mut self, heading: &str) -> Result<(), StatusError> {
        let (line, text) = self.next(heading)?;
        if text != heading {
            return Err(StatusError::Parse {
                line,
                message: format!("expected `{heading}`, found `{text}`"),
            });
        }
        Ok(())
    }

    /// Value following `prefix` on the next line.
    fn field(&mut self, prefix: &str) -> Result<(usize, &'a str), StatusError> {
        let (line, text) = self.next(prefix)?;
        match text.strip_prefix(prefix.trim_end()) {
            Some(rest) => Ok((line, rest.trim())),
            None => Err(StatusError::Parse {
                line,
                message: format!("expected `{}`, found `{text}`", prefix.trim()),
            }),
        }
    }

    fn count(&mut self, prefix: &str, unit: &str) -> Result<u64, StatusError> {
        let (line, value) = self.field(prefix)?;
        let digits = value.strip_suffix(unit).unwrap_or_default();
        digits.trim().parse::<u64>().map_err(|_| StatusError::Parse {
            line,
            message: format!("expected `{}<int>{unit}`, found `{value}`", prefix.trim()),
        })
    }
}

fn placeholder_to_none(value: &str) -> Option<&str> {
    (!value.is_empty() && value != NONE_PLACEHOLDER).then_some(value)
}

fn parse_action(line: usize, text: &str) -> Result<RecentAction, StatusError> {
    let bad = |message: String| StatusError::Parse { line, message };

    let rest = text
        .strip_prefix("- [")
        .ok_or_else(|| bad(format!("expected `- [<timestamp>] <action>`, found `{text}`")))?;
    let (timestamp, action) = rest
        .split_once(']')
        .ok_or_else(|| bad(format!("unterminated timestamp in `{text}`")))?;
    let timestamp =
        parse_iso(timestamp).ok_or_else(|| bad(format!("invalid timestamp `{timestamp}`")))?;

    Ok(RecentAction {
        timestamp,
        action: action.strip_prefix(' ').unwrap_or(action).to_string(),
    })
}

/// Parse a complete document back into a record.
pub fn parse_status_document(text: &str) -> Result<AgentStatusRecord, StatusError> {
    let mut cursor = Cursor::new(text);

    let (line, agent_type) = cursor.field(HEADER)?;
    if agent_type.is_empty() {
        return Err(StatusError::Parse {
            line,
            message: "missing agent type in header".to_string(),
        });
    }

    let (line, raw) = cursor.field(LAST_UPDATED)?;
    let last_updated = parse_iso(raw).ok_or_else(|| StatusError::Parse {
        line,
        message: format!("invalid timestamp `{raw}`"),
    })?;

    let (line, raw) = cursor.field(STATUS)?;
    let status = raw
        .parse::<AgentState>()
        .map_err(|message| StatusError::Parse { line, message })?;

    cursor.heading(CURRENT_ACTIVITY)?;
    let (_, task) = cursor.field(TASK)?;
    let task = placeholder_to_none(task).map(str::to_string);

    let (line, raw) = cursor.field(PROGRESS)?;
    let progress = raw
        .strip_suffix('%')
        .and_then(|p| p.trim().parse::<u8>().ok())
        .filter(|p| *p <= 100)
        .ok_or_else(|| StatusError::Parse {
            line,
            message: format!("progress must be 0-100%, found `{raw}`"),
        })?;

    let (_, raw) = cursor.field(DEPENDENCIES)?;
    let dependencies: Vec<String> = match placeholder_to_none(raw) {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    cursor.heading(RECENT_ACTIONS)?;
    let mut recent_actions = Vec::new();
    if cursor.peek() == Some(NO_RECENT_ACTIONS) {
        cursor.next(NO_RECENT_ACTIONS)?;
    } else {
        while let Some(text) = cursor.peek() {
            if text == METRICS {
                break;
            }
            let (line, text) = cursor.next("recent action")?;
            recent_actions.push(parse_action(line, text)?);
        }
    }

    cursor.heading(METRICS)?;
    let tasks_completed = cursor.count(TASKS_COMPLETED, "")?;
    let uptime_seconds = cursor.count(UPTIME, "s")?;
    let error_count = cursor.count(ERROR_COUNT, "")?;

    if let Some(&(line, text)) = cursor.lines.get(cursor.pos) {
        return Err(StatusError::Parse {
            line,
            message: format!("unexpected trailing content `{text}`"),
        });
    }

    let mut record = AgentStatusRecord {
        agent_type: agent_type.to_string(),
        status,
        last_updated,
        current_activity: CurrentActivity {
            task,
            progress,
            dependencies: Vec::new(),
        },
        recent_actions,
        metrics: AgentMetrics {
            tasks_completed,
            uptime_seconds,
            error_count,
        },
    };
    record.set_dependencies(dependencies);
    Ok(record)
}
