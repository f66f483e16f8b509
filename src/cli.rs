use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::mcp::types::AgentType;

#[derive(Parser, Debug)]
#[command(name = "agentmesh", version, about = "Agent RPC and status substrate")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct CommonArgs {
    /// Agent workspace directory (also where agentmesh.toml is looked up)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Shared status directory
    #[arg(long)]
    pub shared_dir: Option<PathBuf>,

    /// Path to config file (overrides default search)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one agent until interrupted
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Agent id (defaults to "<type>-agent")
        #[arg(long)]
        id: Option<String>,

        /// Agent role: customer, pm, coder, reviewer or tester
        #[arg(short = 't', long = "type", value_parser = parse_agent_type)]
        agent_type: Option<AgentType>,

        /// Listen address
        #[arg(long)]
        host: Option<String>,

        /// Listen port (0 picks a free port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Peer to register with the router, as ID=URL (repeatable)
        #[arg(long = "peer", value_parser = parse_peer)]
        peers: Vec<(String, String)>,
    },
    /// Watch the shared status directory and log changes
    Watch {
        #[command(flatten)]
        common: CommonArgs,

        /// Seconds between full re-scans
        #[arg(long)]
        scan_interval: Option<u64>,
    },
    /// Send one RPC request to a peer and print the result
    Call {
        #[command(flatten)]
        common: CommonArgs,

        /// Peer base URL, e.g. http://127.0.0.1:3001
        url: String,

        /// RPC method: ping, tools/list or tools/call
        method: String,

        /// JSON params, e.g. '{"name":"echo","arguments":{"x":1}}'
        #[arg(long)]
        params: Option<String>,

        /// Total attempts before giving up
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Base backoff between attempts in milliseconds
        #[arg(long, default_value_t = 1000)]
        backoff_ms: u64,

        /// Request timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Serve { common, .. }
            | Commands::Watch { common, .. }
            | Commands::Call { common, .. } => common,
        }
    }
}

fn parse_agent_type(raw: &str) -> Result<AgentType, String> {
    raw.parse()
}

fn parse_peer(raw: &str) -> Result<(String, String), String> {
    let (id, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=URL, got '{raw}'"))?;
    if id.trim().is_empty() || url.trim().is_empty() {
        return Err(format!("expected ID=URL, got '{raw}'"));
    }
    Ok((id.trim().to_string(), url.trim().to_string()))
}
