//! One agent process: RPC server plus status publisher.

use std::time::Duration;

use serde_json::json;

use crate::config::AppConfig;
use crate::error::McpError;
use crate::mcp::registry::{ToolDefinition, ToolRegistry};
use crate::mcp::server::McpAgentServer;
use crate::mcp::types::AgentIdentity;
use crate::status::types::{AgentState, AgentStatusRecord};
use crate::status::writer::AgentOutputWriter;

/// Wires an [`McpAgentServer`] to an [`AgentOutputWriter`] so that status
/// changes are published and served through `getStatus`.
pub struct AgentRuntime {
    server: McpAgentServer,
    writer: AgentOutputWriter,
}

impl AgentRuntime {
    pub fn new(server: McpAgentServer, writer: AgentOutputWriter) -> Self {
        Self { server, writer }
    }

    /// Build the server and writer described by `config`.
    pub fn from_config(config: &AppConfig, registry: ToolRegistry) -> Self {
        let identity = AgentIdentity::new(config.agent_id.clone(), config.agent_type);
        let server = McpAgentServer::new(identity, &config.host, config.port, registry)
            .with_capabilities(config.capabilities.clone());
        let writer = AgentOutputWriter::new(
            config.agent_id.clone(),
            config.agent_type.as_str(),
            config.workspace.clone(),
            config.shared_dir.clone(),
            Duration::from_secs(config.publish_interval_secs),
        );
        Self::new(server, writer)
    }

    pub fn identity(&self) -> &AgentIdentity {
        self.server.identity()
    }

    pub fn server(&self) -> &McpAgentServer {
        &self.server
    }

    pub fn writer(&self) -> &AgentOutputWriter {
        &self.writer
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// Start publishing, then start serving.
    ///
    /// `getStatus` is replaced with a handler reporting the live status
    /// record alongside the agent's identity.
    pub async fn start(&mut self) -> Result<(), McpError> {
        self.writer.start();

        let writer = self.writer.clone();
        let identity = self.server.identity().clone();
        self.server.register_tool(
            ToolDefinition::new("getStatus", "Report the agent's published status").tag("builtin"),
            move |_args| {
                let record = writer.current_status();
                let identity = identity.clone();
                async move {
                    Ok::<_, anyhow::Error>(json!({
                        "agentId": identity.agent_id,
                        "agentType": identity.agent_type,
                        "status": record,
                    }))
                }
            },
        );

        self.server.start().await?;
        self.record_action("Agent started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.record_action("Agent stopping");
        self.server.stop().await;
        self.writer.stop().await;
    }

    pub fn current_status(&self) -> AgentStatusRecord {
        self.writer.current_status()
    }

    /// Switch to BUSY on a new task.
    pub fn begin_task(&self, task: &str, dependencies: &[&str]) {
        self.writer.apply(|r| {
            r.status = AgentState::Busy;
            r.current_activity.task = Some(task.to_string());
            r.current_activity.progress = 0;
            r.set_dependencies(dependencies.iter().copied());
            r.push_action(format!("Started task: {task}"));
        });
    }

    pub fn set_progress(&self, progress: u8) {
        self.writer.apply(|r| {
            r.set_progress(progress);
            let action = format!("Progress {}%", r.current_activity.progress);
            r.push_action(action);
        });
    }

    /// Switch to BLOCKED waiting on `dependencies`.
    pub fn block_on(&self, dependencies: &[&str]) {
        self.writer.apply(|r| {
            r.status = AgentState::Blocked;
            r.set_dependencies(dependencies.iter().copied());
            r.push_action(format!("Blocked on {}", dependencies.join(", ")));
        });
    }

    /// Finish the current task and go back to IDLE.
    pub fn complete_task(&self) {
        self.writer.apply(|r| {
            let task = r.current_activity.task.take().unwrap_or_else(|| "task".to_string());
            r.status = AgentState::Idle;
            r.current_activity.progress = 0;
            r.current_activity.dependencies.clear();
            r.metrics.tasks_completed += 1;
            r.push_action(format!("Completed: {task}"));
        });
    }

    pub fn record_error(&self, message: &str) {
        tracing::warn!(agent_id = %self.identity().agent_id, "Agent error: {message}");
        self.writer.apply(|r| {
            r.status = AgentState::Error;
            r.metrics.error_count += 1;
            r.push_action(format!("Error: {message}"));
        });
    }

    pub fn record_action(&self, action: &str) {
        self.writer.apply(|r| r.push_action(action));
    }
}
