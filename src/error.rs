use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid config value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors surfaced by the RPC layer (server, client, router).
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message} after {timeout_ms}ms")]
    Timeout { message: String, timeout_ms: u64 },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool handler failed: {0}")]
    Handler(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

impl McpError {
    /// Whether the peer could not be reached at all (as opposed to answering
    /// with an error).
    pub fn is_connection(&self) -> bool {
        matches!(self, McpError::Connection { .. })
    }

    /// RPC error code reported to callers for this error.
    pub fn rpc_code(&self) -> i64 {
        match self {
            McpError::InvalidParams(_) => crate::mcp::types::INVALID_PARAMS,
            McpError::Remote { code, .. } => *code,
            _ => crate::mcp::types::INTERNAL_ERROR,
        }
    }
}

/// Errors related to status publication and synchronization.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Status document does not match the expected format (line {line}): {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch {path}: {message}")]
    Watch { path: PathBuf, message: String },
}
