use crate::config::*;
use crate::error::{Error, Result};
use crate::exchange::ExchangeDefinition;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_exchanges_dir")]
    pub exchanges_dir: PathBuf,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

fn default_exchanges_dir() -> PathBuf {
    PathBuf::from("resources/exchanges")
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        Self::load_from(Path::new("config"), env)
    }

    /// `{dir}/default`, then optional `{dir}/{env}`, then `COINHARVEST__*`
    /// environment variables.
    pub fn load_from(dir: &Path, env: &str) -> Result<Self> {
        let base = dir.join("default");
        let layer = dir.join(env);
        let config = Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()))
            .add_source(File::with_name(&layer.to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("COINHARVEST").separator("__"))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))
    }
}

/// Every `*.json` exchange definition in `dir`, ordered by file name.
pub fn load_exchange_definitions(dir: &Path) -> Result<Vec<ExchangeDefinition>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::ConfigError(format!("Cannot read {}: {}", dir.display(), e)))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths.iter().map(|path| ExchangeDefinition::load(path)).collect()
}
