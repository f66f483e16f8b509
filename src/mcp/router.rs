//! Directory of reachable agents plus point-to-point and broadcast delivery.
//!
//! [`MessageRouter`] keeps an `agent_id -> base_url` map. Messages are
//! delivered as `tools/call` requests whose tool name is the message's
//! `method`; the original envelope travels alongside the payload under
//! `_messageMetadata` so the receiving handler knows who sent it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::client::post_rpc;
use super::types::{AgentMessage, Recipients, RpcRequest};
use crate::clock::now_iso;
use crate::error::McpError;

/// Deadline applied when a message does not carry its own.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 5000;

/// Deadline for the `/health` probe made by [`MessageRouter::register_agent`].
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes [`AgentMessage`]s to registered agents over HTTP.
///
/// Cheap to clone; clones share the same directory.
#[derive(Clone)]
pub struct MessageRouter {
    agents: Arc<Mutex<HashMap<String, String>>>,
    http: reqwest::Client,
    default_timeout_ms: u64,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(Mutex::new(HashMap::new())),
            http: reqwest::Client::new(),
            default_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
        }
    }

    /// Override the deadline used for messages without a `timeout`.
    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Add `agent_id` to the directory after confirming `<base_url>/health`
    /// reports healthy. Re-registering an id replaces its URL.
    pub async fn register_agent(&self, agent_id: &str, base_url: &str) -> Result<(), McpError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let health_url = format!("{base_url}/health");

        let response = self
            .http
            .get(&health_url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| McpError::Connection {
                url: health_url.clone(),
                message: format!("health check failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(McpError::Connection {
                url: health_url,
                message: format!("health check returned HTTP {}", response.status()),
            });
        }

        let body: Value = response.json().await.map_err(|e| McpError::Connection {
            url: health_url.clone(),
            message: format!("health check returned invalid JSON: {e}"),
        })?;
        if body.get("status").and_then(|s| s.as_str()) != Some("healthy") {
            return Err(McpError::Connection {
                url: health_url,
                message: format!("agent reported unhealthy: {body}"),
            });
        }

        self.agents
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), base_url.clone());
        tracing::info!(agent_id, url = %base_url, "Agent registered with router");
        Ok(())
    }

    /// Remove `agent_id` from the directory. Returns `true` if it was present.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.agents.lock().unwrap().remove(agent_id).is_some();
        if removed {
            tracing::info!(agent_id, "Agent unregistered from router");
        }
        removed
    }

    pub fn agent_url(&self, agent_id: &str) -> Option<String> {
        self.agents.lock().unwrap().get(agent_id).cloned()
    }

    /// `(agent_id, base_url)` pairs sorted by id.
    pub fn registered_agents(&self) -> Vec<(String, String)> {
        let agents = self.agents.lock().unwrap();
        let mut list: Vec<(String, String)> =
            agents.iter().map(|(id, url)| (id.clone(), url.clone())).collect();
        list.sort();
        list
    }

    /// Deliver a message to its single recipient and return the tool result.
    pub async fn route_message(&self, message: &AgentMessage) -> Result<Value, McpError> {
        let recipient = match &message.to {
            Recipients::One(id) => id.clone(),
            Recipients::Many(_) => {
                return Err(McpError::Protocol(
                    "route_message requires a single recipient; use broadcast_message".to_string(),
                ));
            }
        };

        let base_url = self
            .agent_url(&recipient)
            .ok_or_else(|| McpError::NotFound(format!("Agent not found: {recipient}")))?;

        let message_id = message
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let request = RpcRequest::tool_call(&message.method, wrap_arguments(message, &recipient, &message_id))
            .with_id(message_id.clone());

        let timeout_ms = message.timeout.unwrap_or(self.default_timeout_ms);
        tracing::debug!(
            from = %message.from,
            to = %recipient,
            method = %message.method,
            message_id = %message_id,
            timeout_ms,
            "Routing message"
        );

        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            post_rpc(&self.http, &base_url, &request, None),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(to = %recipient, method = %message.method, timeout_ms, "Message timed out");
                Err(McpError::Timeout {
                    message: format!("Message timeout waiting for {recipient}"),
                    timeout_ms,
                })
            }
        }
    }

    /// Deliver a message to every recipient concurrently.
    ///
    /// Results come back in recipient order. The first failure fails the
    /// whole broadcast.
    pub async fn broadcast_message(&self, message: &AgentMessage) -> Result<Vec<Value>, McpError> {
        let recipients: Vec<String> = match &message.to {
            Recipients::Many(ids) => ids.clone(),
            Recipients::One(id) => vec![id.clone()],
        };

        let deliveries = recipients.into_iter().map(|recipient| {
            let mut single = message.clone();
            single.to = Recipients::One(recipient);
            async move { self.route_message(&single).await }
        });

        try_join_all(deliveries).await
    }
}

/// Merge the message payload with routing metadata into tool arguments.
///
/// Object payloads are extended in place; anything else is carried under a
/// `payload` key.
fn wrap_arguments(message: &AgentMessage, recipient: &str, message_id: &str) -> Value {
    let mut arguments = match &message.payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };

    arguments.insert(
        "_messageMetadata".to_string(),
        json!({
            "from": message.from,
            "to": recipient,
            "type": message.message_type,
            "id": message_id,
            "timestamp": now_iso(),
        }),
    );

    Value::Object(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::MessageType;

    #[test]
    fn object_payload_gains_metadata() {
        let message = AgentMessage::request("pm-agent", "coder-agent", "implement", json!({"story": 3}));
        let args = wrap_arguments(&message, "coder-agent", "m-1");

        assert_eq!(args["story"], 3);
        let meta = &args["_messageMetadata"];
        assert_eq!(meta["from"], "pm-agent");
        assert_eq!(meta["to"], "coder-agent");
        assert_eq!(meta["type"], "request");
        assert_eq!(meta["id"], "m-1");
        assert!(meta["timestamp"].is_string());
    }

    #[test]
    fn scalar_payload_is_nested() {
        let mut message = AgentMessage::request("pm-agent", "tester-agent", "run", json!("all"));
        message.message_type = MessageType::Notification;
        let args = wrap_arguments(&message, "tester-agent", "m-2");
        assert_eq!(args["payload"], "all");
        assert_eq!(args["_messageMetadata"]["type"], "notification");
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found() {
        let router = MessageRouter::new();
        let message = AgentMessage::request("pm-agent", "ghost-agent", "ping", Value::Null);
        let err = router.route_message(&message).await.unwrap_err();
        assert!(matches!(err, McpError::NotFound(_)));
        assert!(err.to_string().contains("Agent not found"));
    }

    #[tokio::test]
    async fn route_rejects_list_recipient() {
        let router = MessageRouter::new();
        let message = AgentMessage::request(
            "pm-agent",
            vec!["a".to_string(), "b".to_string()],
            "ping",
            Value::Null,
        );
        let err = router.route_message(&message).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[tokio::test]
    async fn register_fails_for_unreachable_agent() {
        let router = MessageRouter::new();
        let err = router
            .register_agent("coder-agent", "http://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(router.registered_agents().is_empty());
    }

    #[test]
    fn unregister_unknown_agent_returns_false() {
        let router = MessageRouter::new();
        assert!(!router.unregister_agent("nobody"));
    }
}
