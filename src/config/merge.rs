use super::schema::{AppConfig, PartialConfig};
use crate::mcp::types::AgentType;
use std::collections::BTreeMap;
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For capabilities: REPLACE semantics (if self has Some, use it entirely).
    /// For peers: UNION semantics, with self winning on duplicate ids.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        let peers = match (self.peers, fallback.peers) {
            (Some(mine), Some(mut theirs)) => {
                theirs.extend(mine);
                Some(theirs)
            }
            (mine, theirs) => mine.or(theirs),
        };

        PartialConfig {
            agent_id: self.agent_id.or(fallback.agent_id),
            agent_type: self.agent_type.or(fallback.agent_type),
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            capabilities: self.capabilities.or(fallback.capabilities),
            workspace: self.workspace.or(fallback.workspace),
            shared_dir: self.shared_dir.or(fallback.shared_dir),
            publish_interval_secs: self.publish_interval_secs.or(fallback.publish_interval_secs),
            scan_interval_secs: self.scan_interval_secs.or(fallback.scan_interval_secs),
            request_timeout_ms: self.request_timeout_ms.or(fallback.request_timeout_ms),
            message_timeout_ms: self.message_timeout_ms.or(fallback.message_timeout_ms),
            peers,
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let agent_type = self.agent_type.unwrap_or(AgentType::Coder);
        let agent_id = self
            .agent_id
            .unwrap_or_else(|| format!("{}-agent", agent_type.as_str()));
        let capabilities = self.capabilities.unwrap_or_else(|| {
            agent_type
                .default_capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect()
        });
        let workspace = self
            .workspace
            .unwrap_or_else(|| PathBuf::from("./workspace").join(&agent_id));

        AppConfig {
            agent_id,
            agent_type,
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(3000),
            capabilities,
            workspace,
            shared_dir: self
                .shared_dir
                .unwrap_or_else(|| PathBuf::from("./shared/status")),
            publish_interval_secs: self.publish_interval_secs.unwrap_or(30),
            scan_interval_secs: self.scan_interval_secs.unwrap_or(10),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(30_000),
            message_timeout_ms: self.message_timeout_ms.unwrap_or(5_000),
            peers: self.peers.unwrap_or_else(BTreeMap::new),
        }
    }
}
