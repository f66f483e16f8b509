use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::mcp::types::AgentType;

/// The TOML file structure for agentmesh.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub agent: Option<AgentSection>,
    pub status: Option<StatusSection>,
    pub network: Option<NetworkSection>,
    /// Peer agent id -> base URL, registered with the router on `serve`.
    pub peers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct AgentSection {
    pub id: Option<String>,
    pub agent_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// If specified, fully replaces the agent type's default capabilities.
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct StatusSection {
    pub shared_dir: Option<String>,
    pub workspace: Option<String>,
    pub publish_interval_secs: Option<u64>,
    pub scan_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkSection {
    pub request_timeout_ms: Option<u64>,
    pub message_timeout_ms: Option<u64>,
}

impl ConfigFile {
    /// Flatten the sections into a PartialConfig.
    ///
    /// An unrecognized agent type is logged and left unset so lower layers
    /// (or the default) apply.
    pub fn to_partial(self) -> PartialConfig {
        let agent = self.agent;
        let status = self.status;
        let network = self.network;

        let agent_type = agent
            .as_ref()
            .and_then(|a| a.agent_type.as_deref())
            .and_then(|raw| match raw.parse::<AgentType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!("Ignoring agent_type in config: {e}");
                    None
                }
            });

        let (agent_id, host, port, capabilities) = match agent {
            Some(a) => (a.id, a.host, a.port, a.capabilities),
            None => (None, None, None, None),
        };
        let (shared_dir, workspace, publish_interval_secs, scan_interval_secs) = match status {
            Some(s) => (
                s.shared_dir.map(PathBuf::from),
                s.workspace.map(PathBuf::from),
                s.publish_interval_secs,
                s.scan_interval_secs,
            ),
            None => (None, None, None, None),
        };
        let (request_timeout_ms, message_timeout_ms) = match network {
            Some(n) => (n.request_timeout_ms, n.message_timeout_ms),
            None => (None, None),
        };

        PartialConfig {
            agent_id,
            agent_type,
            host,
            port,
            capabilities,
            workspace,
            shared_dir,
            publish_interval_secs,
            scan_interval_secs,
            request_timeout_ms,
            message_timeout_ms,
            peers: self.peers,
        }
    }
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub host: String,
    pub port: u16,
    pub capabilities: Vec<String>,
    pub workspace: PathBuf,
    pub shared_dir: PathBuf,
    pub publish_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub request_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub peers: BTreeMap<String, String>,
}

impl AppConfig {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("status.publish_interval_secs", self.publish_interval_secs),
            ("status.scan_interval_secs", self.scan_interval_secs),
            ("network.request_timeout_ms", self.request_timeout_ms),
            ("network.message_timeout_ms", self.message_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agent.id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        for (id, url) in &self.peers {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue {
                    field: format!("peers.{id}"),
                    message: format!("`{url}` is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub agent_id: Option<String>,
    pub agent_type: Option<AgentType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub capabilities: Option<Vec<String>>,
    pub workspace: Option<PathBuf>,
    pub shared_dir: Option<PathBuf>,
    pub publish_interval_secs: Option<u64>,
    pub scan_interval_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub message_timeout_ms: Option<u64>,
    pub peers: Option<BTreeMap<String, String>>,
}
