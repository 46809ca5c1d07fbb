//! Configuration resolution for fincaops-bridge
//!
//! Settings resolve through the shared priority chain: CLI argument, then
//! `FINCAOPS_*` environment variable, then the service TOML file, then a
//! compiled default under the OS data directory.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fincaops_common::config::{config_file_path, default_data_dir, load_toml, resolve_setting};
use fincaops_common::{Error, Result};
use serde::Deserialize;
use tracing::info;

pub const SERVICE_NAME: &str = "fincaops-bridge";

/// Default HTTP port for the bridge
const DEFAULT_PORT: u16 = 5731;
const DEFAULT_AGENT_TABLE: &str = "tickets";
const DEFAULT_POLL_SECS: u64 = 2;
const DEFAULT_DIRECTORY_REFRESH_SECS: u64 = 60;
const DEFAULT_DIRECTORY_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Parser)]
#[command(name = SERVICE_NAME, about = "Incident reconciliation bridge for the FincaOps console")]
pub struct CliArgs {
    /// Path to the registry (system of record) database
    #[arg(long)]
    pub registry_db: Option<String>,

    /// Path to the agent ingestion database
    #[arg(long)]
    pub agent_db: Option<String>,

    /// Name of the agent's ticket table
    #[arg(long)]
    pub agent_table: Option<String>,

    /// HTTP listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding agent-side attachment files
    #[arg(long)]
    pub agent_attachments_dir: Option<String>,

    /// Directory migrated attachments are written into
    #[arg(long)]
    pub registry_attachments_dir: Option<String>,
}

/// Optional overrides from `~/.config/fincaops/fincaops-bridge.toml`
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub registry_db: Option<String>,
    pub agent_db: Option<String>,
    pub agent_table: Option<String>,
    pub port: Option<u16>,
    pub agent_attachments_dir: Option<String>,
    pub registry_attachments_dir: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub directory_refresh_secs: Option<u64>,
    pub directory_timeout_ms: Option<u64>,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub registry_db: PathBuf,
    pub agent_db: PathBuf,
    pub agent_table: String,
    pub port: u16,
    pub agent_attachments_dir: PathBuf,
    pub registry_attachments_dir: PathBuf,
    /// How often the store watchers probe for changes
    pub poll_interval: Duration,
    pub directory_refresh_interval: Duration,
    pub directory_refresh_timeout: Duration,
}

impl BridgeConfig {
    pub fn resolve(cli: &CliArgs) -> Result<Self> {
        let toml_config: TomlConfig = match config_file_path(SERVICE_NAME) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                load_toml(&path)?
            }
            None => TomlConfig::default(),
        };

        let data_dir = default_data_dir();
        let default_registry_db = data_dir.join("registry.db");
        let default_agent_db = data_dir.join("agent.db");
        let default_agent_attachments = data_dir.join("agent-attachments");
        let default_registry_attachments = data_dir.join("attachments");

        let registry_db = PathBuf::from(resolve_setting(
            cli.registry_db.as_deref(),
            "FINCAOPS_REGISTRY_DB",
            toml_config.registry_db.as_deref(),
            &default_registry_db.to_string_lossy(),
        ));
        let agent_db = PathBuf::from(resolve_setting(
            cli.agent_db.as_deref(),
            "FINCAOPS_AGENT_DB",
            toml_config.agent_db.as_deref(),
            &default_agent_db.to_string_lossy(),
        ));
        let agent_table = resolve_setting(
            cli.agent_table.as_deref(),
            "FINCAOPS_AGENT_TABLE",
            toml_config.agent_table.as_deref(),
            DEFAULT_AGENT_TABLE,
        );
        let agent_attachments_dir = PathBuf::from(resolve_setting(
            cli.agent_attachments_dir.as_deref(),
            "FINCAOPS_AGENT_ATTACHMENTS_DIR",
            toml_config.agent_attachments_dir.as_deref(),
            &default_agent_attachments.to_string_lossy(),
        ));
        let registry_attachments_dir = PathBuf::from(resolve_setting(
            cli.registry_attachments_dir.as_deref(),
            "FINCAOPS_REGISTRY_ATTACHMENTS_DIR",
            toml_config.registry_attachments_dir.as_deref(),
            &default_registry_attachments.to_string_lossy(),
        ));

        let port = match cli.port {
            Some(p) => p,
            None => match std::env::var("FINCAOPS_PORT") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| Error::Config(format!("FINCAOPS_PORT not a port: {:?}", v)))?,
                Err(_) => toml_config.port.unwrap_or(DEFAULT_PORT),
            },
        };

        Ok(Self {
            registry_db,
            agent_db,
            agent_table,
            port,
            agent_attachments_dir,
            registry_attachments_dir,
            poll_interval: Duration::from_secs(
                toml_config.poll_interval_secs.unwrap_or(DEFAULT_POLL_SECS),
            ),
            directory_refresh_interval: Duration::from_secs(
                toml_config
                    .directory_refresh_secs
                    .unwrap_or(DEFAULT_DIRECTORY_REFRESH_SECS),
            ),
            directory_refresh_timeout: Duration::from_millis(
                toml_config
                    .directory_timeout_ms
                    .unwrap_or(DEFAULT_DIRECTORY_TIMEOUT_MS),
            ),
        })
    }
}
