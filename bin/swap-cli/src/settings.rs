use anyhow::{Context, Result};
use config::{Config, Environment, File};
use htlc_core::{ChainInfo, ChainRegistry, CoordinatorConfig};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG: &str = "swap";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log_level: String,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Chains registered on top of the built-in table
    #[serde(default)]
    pub chains: Vec<ChainInfo>,
}

impl Settings {
    /// Defaults, then `swap.toml` (or `path`), then `HTLC__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("log_level", "info")?
            .add_source(file)
            .add_source(
                Environment::with_prefix("HTLC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings
            .coordinator
            .validate()
            .context("invalid coordinator settings")?;
        Ok(settings)
    }

    pub fn registry(&self) -> ChainRegistry {
        ChainRegistry::default().with_chains(self.chains.iter().cloned())
    }
}

pub fn init_tracing(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .with_context(|| format!("invalid log level {}", level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}
