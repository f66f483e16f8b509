//! Per-agent HTTP listener exposing tools over a small JSON-RPC-like protocol.
//!
//! Routes:
//! - `POST /mcp`: `ping`, `tools/list`, `tools/call`
//! - `GET /capabilities`: static capabilities plus registered tools
//! - `GET /health`: liveness and identity
//!
//! Every failure inside `/mcp` (unparseable body, unknown method or tool,
//! invalid arguments, handler error or panic) is turned into an
//! `{error:{code,message}}` body with HTTP 400. A misbehaving handler never
//! takes the listener down.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use super::registry::{validate_arguments, ToolDefinition, ToolRegistry};
use super::types::{AgentIdentity, RpcRequest, RpcResponse, PARSE_ERROR};
use crate::clock::now_iso;
use crate::error::McpError;

/// How long `stop()` waits for in-flight requests before aborting the listener.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Async tool implementation: takes the call's `arguments`, returns its result.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Box an async closure into a [`ToolHandler`].
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// State shared between the server handle and the axum handlers.
struct ServerState {
    identity: AgentIdentity,
    capabilities: Mutex<Vec<String>>,
    tools: Mutex<HashMap<String, RegisteredTool>>,
    registry: ToolRegistry,
    running: AtomicBool,
    port: AtomicU16,
    created_at: Instant,
}

/// One HTTP listener serving one agent's tools.
pub struct McpAgentServer {
    state: Arc<ServerState>,
    host: String,
    port: u16,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl McpAgentServer {
    /// Create a server for `identity` that will listen on `host:port`.
    ///
    /// Port 0 binds an ephemeral port; the chosen port is available from
    /// [`McpAgentServer::port`] after [`McpAgentServer::start`]. The built-in
    /// `ping` and `getStatus` tools are registered immediately.
    pub fn new(identity: AgentIdentity, host: &str, port: u16, registry: ToolRegistry) -> Self {
        let capabilities = identity
            .agent_type
            .default_capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let state = Arc::new(ServerState {
            identity,
            capabilities: Mutex::new(capabilities),
            tools: Mutex::new(HashMap::new()),
            registry,
            running: AtomicBool::new(false),
            port: AtomicU16::new(port),
            created_at: Instant::now(),
        });

        let server = Self {
            state,
            host: host.to_string(),
            port,
            shutdown: None,
            task: None,
            local_addr: None,
        };
        server.register_builtin_tools();
        server
    }

    /// Replace the static capability list advertised on `/capabilities`.
    pub fn with_capabilities(self, capabilities: Vec<String>) -> Self {
        *self.state.capabilities.lock().unwrap() = capabilities;
        self
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.state.identity
    }

    /// Register (or replace) a tool. The definition's name is the tool name.
    ///
    /// Safe to call while the server is running; the next request sees it.
    pub fn register_tool<F, Fut>(&self, definition: ToolDefinition, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_tool_handler(definition, tool_handler(handler));
    }

    pub fn register_tool_handler(&self, mut definition: ToolDefinition, handler: ToolHandler) {
        let agent_id = &self.state.identity.agent_id;
        definition.agent_id = agent_id.clone();
        let name = definition.name.clone();

        self.state
            .registry
            .register_agent_tool(agent_id, &name, definition.clone());

        let mut tools = self.state.tools.lock().unwrap();
        tools.insert(name, RegisteredTool { definition, handler });
    }

    /// Remove a tool. Returns `true` if it was registered.
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.state
            .registry
            .unregister_agent_tool(&self.state.identity.agent_id, name);
        self.state.tools.lock().unwrap().remove(name).is_some()
    }

    /// Sorted names of all registered tools.
    pub fn tool_names(&self) -> Vec<String> {
        sorted_tool_names(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// The bound port once started, otherwise the configured one.
    pub fn port(&self) -> u16 {
        self.state.port.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Base URL peers use to reach this server, e.g. `http://127.0.0.1:3001`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port())
    }

    /// Bind the listener and start serving in a background task.
    pub async fn start(&mut self) -> Result<SocketAddr, McpError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }

        let bind_addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| McpError::Connection {
                url: bind_addr.clone(),
                message: format!("failed to bind listener: {e}"),
            })?;
        let addr = listener.local_addr().map_err(|e| McpError::Connection {
            url: bind_addr.clone(),
            message: e.to_string(),
        })?;

        // Tools may have been dropped from the registry by a previous stop().
        {
            let tools = self.state.tools.lock().unwrap();
            for (name, tool) in tools.iter() {
                self.state.registry.register_agent_tool(
                    &self.state.identity.agent_id,
                    name,
                    tool.definition.clone(),
                );
            }
        }

        self.state.port.store(addr.port(), Ordering::SeqCst);
        self.state.running.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        let signal = token.clone();
        let app = router(self.state.clone());
        let agent_id = self.state.identity.agent_id.clone();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(agent_id = %agent_id, "MCP server error: {e}");
            }
        });

        tracing::info!(
            agent_id = %self.state.identity.agent_id,
            agent_type = %self.state.identity.agent_type,
            %addr,
            "MCP server listening"
        );

        self.shutdown = Some(token);
        self.task = Some(task);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop serving and release the port.
    ///
    /// Returns only after the listener task has finished, so the port can be
    /// rebound immediately. The agent's tools are removed from the registry.
    pub async fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);

        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!(
                    agent_id = %self.state.identity.agent_id,
                    "MCP server did not drain in time, aborting"
                );
                task.abort();
                let _ = task.await;
            }
        }

        let removed = self
            .state
            .registry
            .unregister_agent(&self.state.identity.agent_id);
        self.local_addr = None;
        tracing::info!(
            agent_id = %self.state.identity.agent_id,
            tools_removed = removed,
            "MCP server stopped"
        );
    }

    fn register_builtin_tools(&self) {
        self.register_tool(
            ToolDefinition::new("ping", "Liveness check; returns pong").tag("builtin"),
            |_args| async { Ok::<_, anyhow::Error>(json!({ "pong": true, "timestamp": now_iso() })) },
        );

        let weak = Arc::downgrade(&self.state);
        self.register_tool(
            ToolDefinition::new("getStatus", "Report the agent's server status").tag("builtin"),
            move |_args| {
                let state = weak.upgrade();
                async move {
                    let state = state.ok_or_else(|| anyhow::anyhow!("server has been dropped"))?;
                    Ok::<_, anyhow::Error>(json!({
                        "agentId": state.identity.agent_id,
                        "agentType": state.identity.agent_type,
                        "running": state.running.load(Ordering::SeqCst),
                        "port": state.port.load(Ordering::SeqCst),
                        "uptimeSeconds": state.created_at.elapsed().as_secs(),
                        "tools": sorted_tool_names(&state),
                    }))
                }
            },
        );
    }
}

impl Drop for McpAgentServer {
    fn drop(&mut self) {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
    }
}

fn sorted_tool_names(state: &ServerState) -> Vec<String> {
    let tools = state.tools.lock().unwrap();
    let mut names: Vec<String> = tools.keys().cloned().collect();
    names.sort();
    names
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_rpc).options(preflight))
        .route("/capabilities", get(capabilities).options(preflight))
        .route("/health", get(health).options(preflight))
        .fallback(fallback)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}

// ── Handlers ───────────────────────────────────────────────────────────

async fn handle_rpc(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return rpc_failure(PARSE_ERROR, format!("Parse error: {e}"), None);
        }
    };
    let id = raw.get("id").cloned();

    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            let e = McpError::Protocol(format!("Invalid request: {e}"));
            return rpc_failure(e.rpc_code(), e.to_string(), id);
        }
    };

    tracing::debug!(
        agent_id = %state.identity.agent_id,
        method = %request.method,
        "RPC request"
    );

    match dispatch(&state, request).await {
        Ok(result) => (StatusCode::OK, Json(RpcResponse::success(result, id))).into_response(),
        Err(e) => {
            tracing::debug!(agent_id = %state.identity.agent_id, "RPC failed: {e}");
            rpc_failure(e.rpc_code(), e.to_string(), id)
        }
    }
}

async fn dispatch(state: &ServerState, request: RpcRequest) -> Result<Value, McpError> {
    match request.method.as_str() {
        "ping" => Ok(json!({
            "pong": true,
            "agentId": state.identity.agent_id,
            "timestamp": now_iso(),
        })),
        "tools/list" => {
            let tools = state.tools.lock().unwrap();
            let mut listed: Vec<&ToolDefinition> = tools.values().map(|t| &t.definition).collect();
            listed.sort_by(|a, b| a.name.cmp(&b.name));
            let listed: Vec<Value> = listed
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.parameters,
                        "version": d.version,
                    })
                })
                .collect();
            Ok(json!({ "tools": listed }))
        }
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let name = params
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| McpError::InvalidParams("tools/call requires params.name".to_string()))?;
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            call_tool(state, name, arguments).await
        }
        other => Err(McpError::NotFound(format!("Method not found: {other}"))),
    }
}

async fn call_tool(state: &ServerState, name: &str, arguments: Value) -> Result<Value, McpError> {
    let tool = {
        let tools = state.tools.lock().unwrap();
        tools.get(name).cloned()
    };
    let tool = tool.ok_or_else(|| McpError::NotFound(format!("Tool not found: {name}")))?;

    validate_arguments(&tool.definition.parameters, &arguments)
        .map_err(|reason| McpError::InvalidParams(format!("{name}: {reason}")))?;

    match AssertUnwindSafe((tool.handler)(arguments)).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(McpError::Handler(format!("{e:#}"))),
        Err(_) => {
            tracing::error!(agent_id = %state.identity.agent_id, tool = name, "Tool handler panicked");
            Err(McpError::Handler(format!("tool '{name}' panicked")))
        }
    }
}

async fn capabilities(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let (names, definitions) = {
        let tools = state.tools.lock().unwrap();
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        let definitions: serde_json::Map<String, Value> = tools
            .iter()
            .map(|(name, tool)| {
                (
                    name.clone(),
                    serde_json::to_value(&tool.definition).unwrap_or(Value::Null),
                )
            })
            .collect();
        (names, definitions)
    };

    let mut capabilities = state.capabilities.lock().unwrap().clone();
    for name in names {
        if !capabilities.contains(&name) {
            capabilities.push(name);
        }
    }

    Json(json!({
        "agentId": state.identity.agent_id,
        "agentType": state.identity.agent_type,
        "capabilities": capabilities,
        "tools": definitions,
    }))
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agentId": state.identity.agent_id,
        "agentType": state.identity.agent_type,
        "running": state.running.load(Ordering::SeqCst),
        "port": state.port.load(Ordering::SeqCst),
        "timestamp": now_iso(),
    }))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

fn rpc_failure(code: i64, message: String, id: Option<Value>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(RpcResponse::failure(code, message, id)),
    )
        .into_response()
}
