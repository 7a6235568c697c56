use std::env;
use std::path::PathBuf;

use resizewatch_core::EngineConfig;
use serde::{Deserialize, Serialize};

use super::ConfigLoadError;

pub const ENV_CONFIG_PATH: &str = "RESIZEWATCH_CONFIG";
pub const ENV_HOST: &str = "RESIZEWATCH_HOST";
pub const ENV_PORT: &str = "RESIZEWATCH_PORT";

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Values picked up from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        let server_port = non_empty(ENV_PORT)
            .map(|raw| {
                raw.parse::<u16>()
                    .map_err(|_| ConfigLoadError::InvalidPort { value: raw })
            })
            .transpose()?;
        Ok(Self {
            config_path: non_empty(ENV_CONFIG_PATH).map(PathBuf::from),
            server_host: non_empty(ENV_HOST),
            server_port,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
