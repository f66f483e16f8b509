//! Wire and identity types shared by the server, client and router.
//!
//! Field names follow the camelCase JSON used on the wire; Rust-side names
//! stay snake_case through `#[serde(rename_all = "camelCase")]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON body could not be parsed.
pub const PARSE_ERROR: i64 = -32700;
/// Tool arguments failed schema validation.
pub const INVALID_PARAMS: i64 = -32602;
/// Unknown method, unknown tool, or handler failure.
pub const INTERNAL_ERROR: i64 = -32603;

/// The five agent roles of the orchestration scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Customer,
    Pm,
    Coder,
    Reviewer,
    Tester,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Customer => "customer",
            AgentType::Pm => "pm",
            AgentType::Coder => "coder",
            AgentType::Reviewer => "reviewer",
            AgentType::Tester => "tester",
        }
    }

    /// Capability names every agent of this type advertises on
    /// `/capabilities`, before any registered tool names.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentType::Customer => &["requirements", "acceptance"],
            AgentType::Pm => &["planning", "coordination", "issue-tracking"],
            AgentType::Coder => &["implementation", "refactoring"],
            AgentType::Reviewer => &["code-review", "quality-gate"],
            AgentType::Tester => &["test-execution", "coverage"],
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(AgentType::Customer),
            "pm" => Ok(AgentType::Pm),
            "coder" => Ok(AgentType::Coder),
            "reviewer" => Ok(AgentType::Reviewer),
            "tester" => Ok(AgentType::Tester),
            other => Err(format!(
                "unknown agent type '{other}'. Expected customer, pm, coder, reviewer or tester"
            )),
        }
    }
}

/// Who an agent is: an opaque id plus its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub agent_id: String,
    pub agent_type: AgentType,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
        }
    }
}

/// Request envelope posted to `/mcp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: None,
            id: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Build a `tools/call` request for the named tool.
    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::new("tools/call").with_params(serde_json::json!({
            "name": name,
            "arguments": arguments,
        }))
    }
}

/// Structured error carried by a failed [`RpcResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// Response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(result: Value, id: Option<Value>) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(code: i64, message: impl Into<String>, id: Option<Value>) -> Self {
        Self {
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// Kind of application message carried between agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

/// Recipient(s) of an [`AgentMessage`]: one agent id, or a list for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Recipients {
    fn from(id: &str) -> Self {
        Recipients::One(id.to_string())
    }
}

impl From<Vec<String>> for Recipients {
    fn from(ids: Vec<String>) -> Self {
        Recipients::Many(ids)
    }
}

/// Application-level message routed between agents by the
/// [`super::router::MessageRouter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub from: String,
    pub to: Recipients,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub method: String,
    #[serde(default)]
    pub payload: Value,
    /// Per-call deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AgentMessage {
    pub fn request(
        from: impl Into<String>,
        to: impl Into<Recipients>,
        method: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            message_type: MessageType::Request,
            method: method.into(),
            payload,
            timeout: None,
            id: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }
}
