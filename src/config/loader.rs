//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources are merged
//! in this order, later ones winning:
//!
//! 1. Built-in defaults ([`FsmConfig::default`])
//! 2. The configuration file (YAML, TOML or JSON by extension)
//! 3. The environment overlay next to it, `<stem>.<environment>.<ext>`, if present
//! 4. `FSM_`-prefixed environment variables, `__` separating sections
//!    (`FSM_ENGINE__VERBOSE_TRACING=true`)

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::FsmConfig;
use crate::constants::CONFIG_ENV_PREFIX;

/// Loaded and validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: FsmConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults plus environment variables, no file.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config = Self::build(None, &environment, None)?;
        Ok(Arc::new(Self {
            config,
            environment,
            source: None,
        }))
    }

    /// Load configuration from a file with environment auto-detection
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file_with_env(path, &environment)
    }

    /// Load configuration from a file with an explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_file_with_env(
        path: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        let config = Self::build(Some(path), environment, None)?;

        info!(
            environment = %environment,
            path = %path.display(),
            app_name = %config.engine.app_name,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            source: Some(path.to_path_buf()),
        }))
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    /// Merges all sources. `env_vars` replaces the process environment when given.
    pub(crate) fn build(
        path: Option<&Path>,
        environment: &str,
        env_vars: Option<config::Map<String, String>>,
    ) -> ConfigResult<FsmConfig> {
        let defaults = Config::try_from(&FsmConfig::default())
            .map_err(|e| ConfigurationError::parse_error("defaults", e))?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            builder = builder.add_source(File::from(path.to_path_buf()));

            if let Some(overlay) = environment_overlay(path, environment) {
                debug!(overlay = %overlay.display(), "Applying environment configuration overlay");
                builder = builder.add_source(File::from(overlay));
            }
        }

        let env_source = Environment::with_prefix(CONFIG_ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env_vars);
        builder = builder.add_source(env_source);

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());
        let config: FsmConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigurationError::parse_error(source_name, e))?;

        config.validate()?;
        Ok(config)
    }
}

/// `config/fsm.yaml` + `test` -> `config/fsm.test.yaml`, when that file exists.
fn environment_overlay(path: &Path, environment: &str) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let extension = path.extension()?.to_str()?;
    let overlay = path.with_file_name(format!("{stem}.{environment}.{extension}"));
    overlay.is_file().then_some(overlay)
}
