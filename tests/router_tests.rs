use std::time::{Duration, Instant};

use agentmesh::error::McpError;
use agentmesh::mcp::{
    AgentIdentity, AgentMessage, AgentType, McpAgentServer, MessageRouter, ToolDefinition,
    ToolRegistry,
};
use serde_json::{json, Value};

/// Agent with `echo`, `whoami` and a `slow` tool that sleeps for 1s.
async fn start_agent(agent_id: &str, agent_type: AgentType) -> McpAgentServer {
    let identity = AgentIdentity::new(agent_id, agent_type);
    let mut server = McpAgentServer::new(identity, "127.0.0.1", 0, ToolRegistry::new());
    server.register_tool(ToolDefinition::new("echo", "Return arguments"), |args| async move {
        Ok::<_, anyhow::Error>(args)
    });
    let me = agent_id.to_string();
    server.register_tool(ToolDefinition::new("whoami", "Return the agent id"), move |_args| {
        let me = me.clone();
        async move { Ok::<_, anyhow::Error>(json!(me)) }
    });
    server.register_tool(ToolDefinition::new("slow", "Sleep for a second"), |_args| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok::<_, anyhow::Error>(json!("done"))
    });
    server.start().await.unwrap();
    server
}

#[tokio::test]
async fn test_route_message_carries_metadata() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let router = MessageRouter::new();
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();

    let mut message = AgentMessage::request("pm-agent", "coder-agent", "echo", json!({"story": 12}));
    message.id = Some("msg-1".to_string());
    let result = router.route_message(&message).await.unwrap();

    assert_eq!(result["story"], 12);
    assert_eq!(result["_messageMetadata"]["from"], "pm-agent");
    assert_eq!(result["_messageMetadata"]["to"], "coder-agent");
    assert_eq!(result["_messageMetadata"]["type"], "request");
    assert_eq!(result["_messageMetadata"]["id"], "msg-1");
    coder.stop().await;
}

#[tokio::test]
async fn test_route_to_unregistered_agent() {
    let router = MessageRouter::new();
    let message = AgentMessage::request("pm-agent", "ghost-agent", "echo", Value::Null);

    let err = router.route_message(&message).await.unwrap_err();
    assert!(err.to_string().contains("Agent not found"), "got {err}");
}

#[tokio::test]
async fn test_route_times_out_no_earlier_than_deadline() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let router = MessageRouter::new();
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();

    let message = AgentMessage::request("pm-agent", "coder-agent", "slow", json!({})).with_timeout(250);
    let start = Instant::now();
    let err = router.route_message(&message).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, McpError::Timeout { timeout_ms: 250, .. }));
    assert!(err.to_string().to_lowercase().contains("timeout"));
    assert!(elapsed >= Duration::from_millis(250), "took {elapsed:?}");
    coder.stop().await;
}

#[tokio::test]
async fn test_router_default_timeout_applies() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let router = MessageRouter::new().with_default_timeout(100);
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();

    let message = AgentMessage::request("pm-agent", "coder-agent", "slow", json!({}));
    let err = router.route_message(&message).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 100, .. }));
    coder.stop().await;
}

#[tokio::test]
async fn test_broadcast_preserves_recipient_order() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let mut tester = start_agent("tester-agent", AgentType::Tester).await;
    let router = MessageRouter::new();
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();
    router.register_agent("tester-agent", &tester.base_url()).await.unwrap();

    let message = AgentMessage::request(
        "pm-agent",
        vec!["tester-agent".to_string(), "coder-agent".to_string()],
        "whoami",
        Value::Null,
    );
    let results = router.broadcast_message(&message).await.unwrap();
    assert_eq!(results, vec![json!("tester-agent"), json!("coder-agent")]);

    coder.stop().await;
    tester.stop().await;
}

#[tokio::test]
async fn test_broadcast_fails_if_any_recipient_unregistered() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let router = MessageRouter::new();
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();

    let message = AgentMessage::request(
        "pm-agent",
        vec!["coder-agent".to_string(), "reviewer-agent".to_string()],
        "whoami",
        Value::Null,
    );
    let err = router.broadcast_message(&message).await.unwrap_err();
    assert!(err.to_string().contains("Agent not found"));
    coder.stop().await;
}

#[tokio::test]
async fn test_register_requires_healthy_agent() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let url = coder.base_url();
    coder.stop().await;

    let router = MessageRouter::new();
    let err = router.register_agent("coder-agent", &url).await.unwrap_err();
    assert!(err.is_connection());
    assert!(router.agent_url("coder-agent").is_none());
}

#[tokio::test]
async fn test_unregister_removes_agent() {
    let mut coder = start_agent("coder-agent", AgentType::Coder).await;
    let router = MessageRouter::new();
    router.register_agent("coder-agent", &coder.base_url()).await.unwrap();
    assert_eq!(router.registered_agents().len(), 1);

    assert!(router.unregister_agent("coder-agent"));
    let message = AgentMessage::request("pm-agent", "coder-agent", "whoami", Value::Null);
    assert!(matches!(
        router.route_message(&message).await,
        Err(McpError::NotFound(_))
    ));
    coder.stop().await;
}
