use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::sources::{EnvConfig, FileConfig};
use super::{Config, ConfigMetadata, DEFAULT_HOST, DEFAULT_PORT, ServerConfig};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["resizewatch.toml", "config/resizewatch.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Layers defaults, a TOML file and the environment. CLI flags are applied
/// on top by the binary.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<Config, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env = EnvConfig::gather()?;
        let (file, config_path) = self.load_file_config(&env)?;

        let mut config = compose_config(file, env);
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        Ok(config)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = parse_file(&path)?;
        Ok((Some(file), Some(path)))
    }
}

fn parse_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment wins over the file, the file over defaults.
pub fn compose_config(file: Option<FileConfig>, env: EnvConfig) -> Config {
    let FileConfig {
        server: file_server,
        engine,
    } = file.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_PORT),
    };

    Config {
        server,
        engine,
        metadata: ConfigMetadata::default(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid port '{value}'")]
    InvalidPort { value: String },
    #[error("failed to load .env file")]
    EnvFile(#[from] dotenvy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use resizewatch_core::ResampleFilter;
    use std::io::Write;

    #[test]
    fn defaults_without_file_or_env() {
        let config = compose_config(None, EnvConfig::default());
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.engine.processing.max_parallel_resizes, 2);
    }

    #[test]
    fn env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [engine.watch]
            stabilization_interval_ms = 250

            [engine.processing]
            filter = "triangle"
            "#,
        )
        .unwrap();

        let env = EnvConfig {
            server_port: Some(9100),
            ..EnvConfig::default()
        };
        let config = compose_config(Some(file), env);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.engine.watch.stabilization_interval_ms, 250);
        // Untouched keys keep their defaults.
        assert_eq!(config.engine.watch.stabilization_timeout_ms, 30_000);
        assert_eq!(config.engine.processing.filter, ResampleFilter::Triangle);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let loader = ConfigLoader::new().with_config_path("/definitely/not/here.toml");
        let err = loader.load_file_config(&EnvConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = parse_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { ref path, .. } if path == file.path()));
    }
}
