use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use agentmesh::agent::AgentRuntime;
use agentmesh::cli::{self, Commands};
use agentmesh::config::{self, AppConfig};
use agentmesh::mcp::{
    AgentMessage, McpClient, MessageRouter, ParamSpec, RetryPolicy, RpcRequest, ToolDefinition,
    ToolRegistry,
};
use agentmesh::status::{StatusEvent, StatusSynchronizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = cli::Cli::parse();
    tracing::info!("agentmesh starting");

    let config = config::load_config(&cli)?;
    tracing::info!(
        agent_id = %config.agent_id,
        shared_dir = %config.shared_dir.display(),
        "Config loaded"
    );

    match cli.command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Watch { .. } => watch(config).await,
        Commands::Call {
            url,
            method,
            params,
            retries,
            backoff_ms,
            ..
        } => call(config, url, method, params, RetryPolicy { max_retries: retries, backoff_ms }).await,
    }
}

/// Run one agent: its server, its status publisher and a router to its peers.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let registry = ToolRegistry::new();
    let mut runtime = AgentRuntime::from_config(&config, registry.clone());

    let router = MessageRouter::new().with_default_timeout(config.message_timeout_ms);

    runtime.server().register_tool(
        ToolDefinition::new("echo", "Return the call arguments unchanged"),
        |args| async move { Ok::<_, anyhow::Error>(args) },
    );

    let relay = router.clone();
    let from = config.agent_id.clone();
    runtime.server().register_tool(
        ToolDefinition::new("sendMessage", "Relay a message to a registered peer")
            .param("to", ParamSpec::string().required().describe("Recipient agent id"))
            .param("method", ParamSpec::string().required().describe("Tool to call on the recipient"))
            .param("payload", ParamSpec::object().describe("Tool arguments"))
            .param("timeoutMs", ParamSpec::integer().min(1.0).describe("Delivery deadline")),
        move |args| {
            let router = relay.clone();
            let from = from.clone();
            async move {
                let to = args["to"].as_str().unwrap_or_default();
                let method = args["method"].as_str().unwrap_or_default();
                let payload = args.get("payload").cloned().unwrap_or(Value::Null);
                let mut message = AgentMessage::request(from.as_str(), to, method, payload);
                if let Some(timeout) = args.get("timeoutMs").and_then(Value::as_u64) {
                    message = message.with_timeout(timeout);
                }
                let result = router.route_message(&message).await?;
                Ok::<_, anyhow::Error>(json!({ "delivered": true, "result": result }))
            }
        },
    );

    runtime
        .start()
        .await
        .with_context(|| format!("Failed to start agent {}", config.agent_id))?;
    println!(
        "Agent {} ({}) listening on {}",
        config.agent_id,
        config.agent_type,
        runtime.base_url()
    );

    for (peer_id, url) in &config.peers {
        match router.register_agent(peer_id, url).await {
            Ok(()) => runtime.record_action(&format!("Registered peer {peer_id}")),
            Err(e) => tracing::warn!(peer = %peer_id, "Peer not registered: {e}"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    runtime.stop().await;
    Ok(())
}

/// Log every change in the shared status directory until interrupted.
async fn watch(config: AppConfig) -> anyhow::Result<()> {
    let mut sync = StatusSynchronizer::new(
        &config.shared_dir,
        Duration::from_secs(config.scan_interval_secs),
    );
    let mut events = sync.subscribe();
    sync.start()
        .await
        .with_context(|| format!("Failed to watch {}", config.shared_dir.display()))?;

    log_status_events(&mut events, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
        }
    })
    .await;

    sync.stop().await;
    Ok(())
}

/// Log status events until `shutdown` resolves or the channel closes.
/// Returns the number of events logged.
async fn log_status_events(
    events: &mut broadcast::Receiver<StatusEvent>,
    shutdown: impl Future<Output = ()>,
) -> usize {
    tokio::pin!(shutdown);
    let mut logged = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let kind = match &event {
                        StatusEvent::Created { .. } => "discovered",
                        StatusEvent::Updated { .. } => "updated",
                    };
                    let status = event.status();
                    tracing::info!(
                        agent_id = %event.agent_id(),
                        kind,
                        status = %status.status,
                        task = status.current_activity.task.as_deref().unwrap_or("None"),
                        progress = status.current_activity.progress,
                        "Agent status"
                    );
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    logged
}

/// Send one request to a peer and print the result as JSON.
async fn call(
    config: AppConfig,
    url: String,
    method: String,
    params: Option<String>,
    policy: RetryPolicy,
) -> anyhow::Result<()> {
    let client = McpClient::new(&config.agent_id, url)
        .with_timeout(Duration::from_millis(config.request_timeout_ms));
    client.connect().await?;

    let mut request = RpcRequest::new(method);
    if let Some(raw) = params {
        let params: Value = serde_json::from_str(&raw).context("--params is not valid JSON")?;
        request = request.with_params(params);
    }

    let result = client.send_request_with_retry(request, policy).await;
    client.disconnect();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
