use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

use super::error::Result;

lazy_static! {
    /// Layered configuration: embedded defaults, then an optional file, then `APP__*` env vars.
    pub static ref BUILDER: RwLock<ConfigBuilder<DefaultState>> = RwLock::new(Config::builder());
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// debug, info, warn, error
    pub level: String,
    /// Directory for the log file; defaults to `logs/` next to the executable
    #[serde(default)]
    pub dir: Option<String>,
}

/// Privileged command used when the ACL cannot be replaced directly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Overrides the platform default (elevated `icacls` via `powershell` on Windows, `sudo` elsewhere)
    #[serde(default)]
    pub program: Option<String>,
    /// Argument convention of `program`: `chmod`, `icacls` or `elevated-icacls`.
    /// Unset means the platform default.
    #[serde(default)]
    pub flavor: Option<String>,
    /// Arguments placed before the generated ones, e.g. `["-n"]` for sudo
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub fallback: FallbackConfig,
}

impl AppConfig {
    /// Reset the configuration to the given TOML defaults plus the environment.
    pub fn init(default_config: Option<&str>) -> Result<()> {
        let mut builder = Config::builder();

        if let Some(contents) = default_config {
            builder = builder.add_source(File::from_str(contents, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut w = BUILDER.write()?;
        *w = builder;
        Ok(())
    }

    /// Layer a user-supplied TOML file over the current configuration.
    pub fn merge_config(config_file: Option<&Path>) -> Result<()> {
        if let Some(path) = config_file {
            let mut w = BUILDER.write()?;
            *w = w.clone().add_source(File::from(path).format(FileFormat::Toml));
        }
        Ok(())
    }

    pub fn set(key: &str, value: &str) -> Result<()> {
        let mut w = BUILDER.write()?;
        *w = w.clone().set_override(key, value)?;
        Ok(())
    }

    pub fn get<T>(key: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let config = BUILDER.read()?.clone().build()?;
        Ok(config.get::<T>(key)?)
    }

    pub fn fetch() -> Result<AppConfig> {
        let config = BUILDER.read()?.clone().build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }
}
