//! Agent-to-agent RPC substrate.
//!
//! Each agent runs one [`server::McpAgentServer`] exposing tools described in
//! a [`registry::ToolRegistry`]. Peers call those tools through an
//! [`client::McpClient`] or, by agent id, through a [`router::MessageRouter`].

pub mod client;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;

pub use client::{backoff_delay, McpClient, RetryPolicy, TEST_SENTINEL_URL};
pub use registry::{ParamSpec, ParamType, ToolDefinition, ToolRegistry};
pub use router::MessageRouter;
pub use server::{tool_handler, McpAgentServer, ToolHandler};
pub use types::{AgentIdentity, AgentMessage, AgentType, MessageType, Recipients, RpcRequest, RpcResponse};
