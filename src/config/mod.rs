pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the global config dir and the workspace.
pub const CONFIG_FILE_NAME: &str = "agentmesh.toml";

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > workspace config (or --config) > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). A file named
/// explicitly with `--config` must exist and parse.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/agentmesh/agentmesh.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: explicit --config file, else workspace/agentmesh.toml
    let common = cli.command.common();
    let file_layer = match &common.config {
        Some(path) => read_config_file(path)?.to_partial(),
        None => {
            let workspace_path = common
                .workspace
                .clone()
                .or_else(|| global.workspace.clone())
                .unwrap_or_else(|| PathBuf::from("./workspace"));
            load_workspace_config(&workspace_path)
        }
    };

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > file > global > defaults
    let config = cli_partial
        .with_fallback(file_layer)
        .with_fallback(global)
        .finalize();
    config.validate()?;

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    let path = global_config_path();
    match path {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load workspace config from workspace/agentmesh.toml.
/// Returns empty PartialConfig if file not found.
fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    let config_path = workspace_path.join(CONFIG_FILE_NAME);
    load_toml_file(&config_path).unwrap_or_default()
}

/// Parse config file contents. `path` is only used for error messages.
pub fn parse_config_str(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str::<ConfigFile>(contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read and parse a config file, failing on any error.
fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let file = parse_config_str(path, &contents)?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(file)
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and skipped.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match read_config_file(path) {
        Ok(config_file) => Some(config_file.to_partial()),
        Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Config error: {}", e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/agentmesh/agentmesh.toml
/// macOS: ~/Library/Application Support/agentmesh/agentmesh.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agentmesh")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    let common = cli.command.common();
    let base = PartialConfig {
        workspace: common.workspace.clone(),
        shared_dir: common.shared_dir.clone(),
        ..Default::default()
    };

    match &cli.command {
        Commands::Serve {
            id,
            agent_type,
            host,
            port,
            peers,
            ..
        } => PartialConfig {
            agent_id: id.clone(),
            agent_type: *agent_type,
            host: host.clone(),
            port: *port,
            peers: (!peers.is_empty()).then(|| peers.iter().cloned().collect()),
            ..base
        },
        Commands::Watch { scan_interval, .. } => PartialConfig {
            scan_interval_secs: *scan_interval,
            ..base
        },
        Commands::Call { timeout, .. } => PartialConfig {
            request_timeout_ms: *timeout,
            ..base
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::AgentType;
    use clap::Parser;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[agent]
id = "review-bot"
agent_type = "reviewer"
port = 3003

[status]
shared_dir = "/tmp/agentmesh/status"
publish_interval_secs = 5

[network]
message_timeout_ms = 2500

[peers]
coder-agent = "http://127.0.0.1:3002"
"#;

    #[test]
    fn parses_all_sections() {
        let partial = parse_config_str(Path::new("agentmesh.toml"), SAMPLE)
            .unwrap()
            .to_partial();
        assert_eq!(partial.agent_id.as_deref(), Some("review-bot"));
        assert_eq!(partial.agent_type, Some(AgentType::Reviewer));
        assert_eq!(partial.port, Some(3003));
        assert_eq!(partial.shared_dir, Some(PathBuf::from("/tmp/agentmesh/status")));
        assert_eq!(partial.publish_interval_secs, Some(5));
        assert_eq!(partial.message_timeout_ms, Some(2500));
        assert_eq!(partial.peers.unwrap()["coder-agent"], "http://127.0.0.1:3002");
    }

    #[test]
    fn unknown_agent_type_is_ignored() {
        let partial = parse_config_str(Path::new("x.toml"), "[agent]\nagent_type = \"manager\"\n")
            .unwrap()
            .to_partial();
        assert_eq!(partial.agent_type, None);
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = parse_config_str(Path::new("broken.toml"), "[agent\nport = ").unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn workspace_file_is_loaded_and_cli_wins() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join(CONFIG_FILE_NAME), SAMPLE).unwrap();
        let workspace = ws.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["agentmesh", "serve", "-w", workspace, "--port", "4100"]).unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.agent_id, "review-bot");
        assert_eq!(config.agent_type, AgentType::Reviewer);
        assert_eq!(config.port, 4100);
        assert_eq!(config.message_timeout_ms, 2500);
        assert_eq!(config.workspace, ws.path());
    }

    #[test]
    fn explicit_config_must_exist() {
        let ws = TempDir::new().unwrap();
        let missing = ws.path().join("missing.toml");
        let cli = Cli::try_parse_from(["agentmesh", "watch", "-c", missing.to_str().unwrap()]).unwrap();
        assert!(load_config(&cli).is_err());
    }
}
