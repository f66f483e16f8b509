use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentmesh::error::McpError;
use agentmesh::mcp::{
    AgentIdentity, AgentType, McpAgentServer, McpClient, RetryPolicy, RpcRequest, ToolDefinition,
    ToolRegistry,
};
use serde_json::{json, Value};

async fn start_server() -> McpAgentServer {
    let identity = AgentIdentity::new("tester-agent", AgentType::Tester);
    let mut server = McpAgentServer::new(identity, "127.0.0.1", 0, ToolRegistry::new());
    server.register_tool(ToolDefinition::new("echo", "Return arguments"), |args| async move {
        Ok::<_, anyhow::Error>(args)
    });
    server.start().await.unwrap();
    server
}

/// Register a tool that fails `failures` times before succeeding; returns the call counter.
fn register_flaky(server: &McpAgentServer, failures: usize) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    server.register_tool(ToolDefinition::new("flaky", "Fails a few times"), move |_args| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt <= failures {
                anyhow::bail!("attempt {attempt} failed");
            }
            Ok(json!({ "attempt": attempt }))
        }
    });
    calls
}

#[tokio::test]
async fn test_connect_and_call_tool() {
    let mut server = start_server().await;
    let client = McpClient::new("pm-agent", server.base_url());

    client.connect().await.unwrap();
    assert!(client.is_connected());

    let result = client.call_tool("echo", json!({"hello": "world"})).await.unwrap();
    assert_eq!(result, json!({"hello": "world"}));

    let pong = client.send_request(RpcRequest::new("ping")).await.unwrap();
    assert_eq!(pong["agentId"], "tester-agent");

    client.disconnect();
    assert!(!client.is_connected());
    server.stop().await;
}

#[tokio::test]
async fn test_connect_failure_is_wrapped() {
    let mut server = start_server().await;
    let url = server.base_url();
    server.stop().await;

    let client = McpClient::new("pm-agent", url).with_timeout(Duration::from_secs(2));
    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection());
    assert!(err.to_string().contains("liveness probe failed"));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_remote_error_surfaces_code() {
    let mut server = start_server().await;
    let client = McpClient::new("pm-agent", server.base_url());
    client.connect().await.unwrap();

    let err = client.call_tool("missing", Value::Null).await.unwrap_err();
    match err {
        McpError::Remote { code, message } => {
            assert_eq!(code, -32603);
            assert!(message.contains("Tool not found"));
        }
        other => panic!("expected remote error, got {other}"),
    }
    server.stop().await;
}

#[tokio::test]
async fn test_retry_with_backoff_succeeds_on_third_attempt() {
    let mut server = start_server().await;
    let calls = register_flaky(&server, 2);
    let client = McpClient::new("pm-agent", server.base_url());
    client.connect().await.unwrap();

    let start = Instant::now();
    let result = client
        .send_request_with_retry(
            RpcRequest::tool_call("flaky", json!({})),
            RetryPolicy {
                max_retries: 3,
                backoff_ms: 100,
            },
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result, json!({"attempt": 3}));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
    server.stop().await;
}

#[tokio::test]
async fn test_retry_exhaustion_returns_last_error() {
    let mut server = start_server().await;
    let calls = register_flaky(&server, usize::MAX);
    let client = McpClient::new("pm-agent", server.base_url());
    client.connect().await.unwrap();

    let err = client
        .send_request_with_retry(
            RpcRequest::tool_call("flaky", json!({})),
            RetryPolicy {
                max_retries: 2,
                backoff_ms: 10,
            },
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("attempt 2 failed"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    server.stop().await;
}

#[tokio::test]
async fn test_request_timeout() {
    let mut server = start_server().await;
    server.register_tool(ToolDefinition::new("slow", "Sleeps"), |_args| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok::<_, anyhow::Error>(Value::Null)
    });
    let client = McpClient::new("pm-agent", server.base_url()).with_timeout(Duration::from_millis(200));
    client.connect().await.unwrap();

    let err = client.call_tool("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }), "got {err}");
    assert!(err.to_string().contains("timeout"));
    server.stop().await;
}
