use std::path::PathBuf;

use clap::Parser;

use plexus_common::{ServerSettings, ServerSettingsPatch};

/// Multi-protocol LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "plexus", version, about)]
pub struct Cli {
    /// Routing config file (YAML).
    #[arg(short, long, env = "PLEXUS_CONFIG")]
    pub config: PathBuf,

    /// Listen address.
    #[arg(long, env = "PLEXUS_HOST")]
    pub host: Option<String>,

    /// Listen port.
    #[arg(short, long, env = "PLEXUS_PORT")]
    pub port: Option<u16>,

    /// Directory for persisted state (cooldowns, usage log).
    #[arg(long, env = "PLEXUS_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Cli {
    pub fn into_settings(self) -> anyhow::Result<ServerSettings> {
        let mut patch = ServerSettingsPatch::default();
        patch.overlay(ServerSettingsPatch {
            host: self.host,
            port: self.port,
            config_path: Some(self.config),
            state_dir: self.state_dir,
        });
        Ok(patch.into_settings()?)
    }
}
