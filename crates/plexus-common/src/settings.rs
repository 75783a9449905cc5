use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
}

/// Final, merged process settings.
///
/// Merge order: CLI > ENV > defaults. Routing configuration lives in the
/// config snapshot, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Path to the routing config file (YAML).
    pub config_path: PathBuf,
    /// Directory for persisted state (cooldowns, usage log).
    pub state_dir: PathBuf,
}

/// Optional layer used when merging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettingsPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config_path: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl ServerSettingsPatch {
    pub fn overlay(&mut self, other: ServerSettingsPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.config_path.is_some() {
            self.config_path = other.config_path;
        }
        if other.state_dir.is_some() {
            self.state_dir = other.state_dir;
        }
    }

    pub fn into_settings(self) -> Result<ServerSettings, SettingsError> {
        Ok(ServerSettings {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            config_path: self
                .config_path
                .ok_or(SettingsError::MissingField("config_path"))?,
            state_dir: self.state_dir.unwrap_or_else(|| PathBuf::from("./data")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = ServerSettingsPatch {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            ..Default::default()
        };
        base.overlay(ServerSettingsPatch {
            port: Some(8080),
            config_path: Some(PathBuf::from("plexus.yaml")),
            ..Default::default()
        });
        let settings = base.into_settings().unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.config_path, PathBuf::from("plexus.yaml"));
    }

    #[test]
    fn config_path_is_required() {
        let err = ServerSettingsPatch::default().into_settings().unwrap_err();
        assert!(matches!(err, SettingsError::MissingField("config_path")));
    }
}
