//! Layered application configuration
//!
//! Sources, lowest priority first:
//! - Built-in defaults
//! - TOML file passed with `--config`
//! - `NAPPING__SECTION__KEY` environment variables

use std::path::Path;

use anyhow::{Context, Result};
use camera_capture::CameraConfig;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sleep_detect::DetectorConfig;
use tracing::{debug, info};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "NAPPING";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sleep detection settings
    pub detector: DetectorConfig,
    /// Frame source settings
    pub camera: CameraConfig,
}

impl AppConfig {
    /// Merge all sources and validate the result
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).context("encoding default configuration")?);

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("reading configuration sources")?
            .try_deserialize()
            .context("parsing configuration")?;

        config.detector.validate()?;
        if config.camera.fps == 0 {
            anyhow::bail!("camera.fps must be at least 1");
        }

        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }
}
