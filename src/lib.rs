pub mod agent;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod mcp;
pub mod status;
