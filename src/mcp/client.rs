//! Outbound RPC client targeting one peer's `/mcp` endpoint.
//!
//! An [`McpClient`] must [`connect`](McpClient::connect) (a `ping` liveness
//! probe) before it sends requests. Retries are explicit: only
//! [`McpClient::send_request_with_retry`] ever repeats a call, sleeping
//! [`backoff_delay`] between attempts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

use super::types::{RpcRequest, RpcResponse};
use crate::error::McpError;

/// Base URL that skips the real liveness probe in [`McpClient::connect`].
///
/// Lets tests and dry runs construct a "connected" client without a peer.
pub const TEST_SENTINEL_URL: &str = "http://mcp-test.invalid";

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry settings for [`McpClient::send_request_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts (at least one is always made).
    pub max_retries: u32,
    /// Base delay; attempt `n` (from 0) is followed by `backoff_ms * 2^n`.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1000,
        }
    }
}

/// Delay to wait after failed attempt number `attempt` (counted from 0).
pub fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

/// POST one request to `<base_url>/mcp` and unwrap the RPC envelope.
///
/// `timeout` bounds the HTTP exchange when given. Transport failures map to
/// [`McpError::Connection`] or [`McpError::Timeout`]; an `error` body maps to
/// [`McpError::Remote`].
pub(crate) async fn post_rpc(
    http: &reqwest::Client,
    base_url: &str,
    request: &RpcRequest,
    timeout: Option<Duration>,
) -> Result<Value, McpError> {
    let url = format!("{}/mcp", base_url.trim_end_matches('/'));

    let mut builder = http.post(&url).json(request);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            McpError::Timeout {
                message: format!("Request to {url} timeout"),
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            }
        } else {
            McpError::Connection {
                url: url.clone(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    let body: RpcResponse = response.json().await.map_err(|e| {
        if e.is_timeout() {
            McpError::Timeout {
                message: format!("Response from {url} timeout"),
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            }
        } else {
            McpError::Protocol(format!("HTTP {status} from {url} with invalid RPC body: {e}"))
        }
    })?;

    match body.error {
        Some(err) => Err(McpError::Remote {
            code: err.code,
            message: err.message,
        }),
        None => Ok(body.result.unwrap_or(Value::Null)),
    }
}

/// Client for one peer agent (or the coordinator).
pub struct McpClient {
    agent_id: String,
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl McpClient {
    /// `agent_id` identifies the calling agent in logs; `base_url` is the
    /// peer's root, e.g. `http://127.0.0.1:3002`.
    pub fn new(agent_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Probe the peer with `ping` and mark the client connected on success.
    pub async fn connect(&self) -> Result<(), McpError> {
        if self.base_url == TEST_SENTINEL_URL {
            tracing::debug!(agent_id = %self.agent_id, "Test sentinel URL, skipping liveness probe");
            self.connected.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let probe = RpcRequest::new("ping").with_id(self.allocate_id());
        let result = post_rpc(&self.http, &self.base_url, &probe, Some(self.request_timeout))
            .await
            .map_err(|e| McpError::Connection {
                url: self.base_url.clone(),
                message: format!("liveness probe failed: {e}"),
            })?;

        if result.get("pong") != Some(&Value::Bool(true)) {
            return Err(McpError::Connection {
                url: self.base_url.clone(),
                message: format!("unexpected ping response: {result}"),
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(agent_id = %self.agent_id, peer = %self.base_url, "Connected to peer");
        Ok(())
    }

    /// Send one request and return its `result`.
    ///
    /// Assigns the next local id when the request has none.
    pub async fn send_request(&self, request: RpcRequest) -> Result<Value, McpError> {
        let request = self.prepare(request)?;
        if !self.is_connected() {
            return Err(McpError::Connection {
                url: self.base_url.clone(),
                message: "client is not connected".to_string(),
            });
        }

        tracing::debug!(
            agent_id = %self.agent_id,
            peer = %self.base_url,
            method = %request.method,
            "Sending request"
        );
        post_rpc(&self.http, &self.base_url, &request, Some(self.request_timeout)).await
    }

    /// [`send_request`](Self::send_request) with exponential backoff.
    ///
    /// Protocol errors are not retried since resending cannot fix them.
    pub async fn send_request_with_retry(
        &self,
        request: RpcRequest,
        policy: RetryPolicy,
    ) -> Result<Value, McpError> {
        let attempts = policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match self.send_request(request.clone()).await {
                Ok(result) => return Ok(result),
                Err(e @ McpError::Protocol(_)) => return Err(e),
                Err(e) if attempt + 1 >= attempts => {
                    tracing::warn!(
                        agent_id = %self.agent_id,
                        method = %request.method,
                        attempts,
                        "Request failed after all retries: {e}"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff_delay(policy.backoff_ms, attempt);
                    tracing::debug!(
                        agent_id = %self.agent_id,
                        method = %request.method,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Convenience wrapper for `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.send_request(RpcRequest::tool_call(name, arguments)).await
    }

    /// Mark the client disconnected. Never fails.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!(agent_id = %self.agent_id, peer = %self.base_url, "Disconnected from peer");
        }
    }

    /// Reject an empty method and fill in a missing id.
    fn prepare(&self, mut request: RpcRequest) -> Result<RpcRequest, McpError> {
        if request.method.trim().is_empty() {
            return Err(McpError::Protocol(
                "request method must be a non-empty string".to_string(),
            ));
        }
        if request.id.is_none() {
            request.id = Some(json!(self.allocate_id()));
        }
        Ok(request)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}
