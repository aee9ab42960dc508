//! Provides the `ConfigBuilder` for fluent configuration construction.

use super::loading::{apply_env_config, apply_file_config, load_config_file};
use super::validation::validate_config;
use super::{Config, ConfigFile};
use crate::core::error::{AppError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Builder pattern for creating `Config` instances fluently.
///
/// Layers are applied in order: defaults, config file, environment,
/// explicit overrides. The result is validated before it is returned.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    config_file_path: Option<String>,
    env: Option<HashMap<String, String>>,
    overrides: ConfigFile,
}

impl ConfigBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify an optional configuration file path to load.
    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_file_path = Some(path.into());
        self
    }

    /// Environment variables to read deployment keys from, usually
    /// `std::env::vars()` after `.env` has been loaded.
    pub fn env_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = Some(vars.into_iter().collect());
        self
    }

    pub fn workers(mut self, value: usize) -> Self {
        self.overrides.dispatch.workers = Some(value);
        self
    }
    pub fn batch_size(mut self, value: usize) -> Self {
        self.overrides.dispatch.batch_size = Some(value);
        self
    }
    pub fn batch_pause(mut self, duration: Duration) -> Self {
        self.overrides.dispatch.batch_pause = Some(duration.as_secs());
        self
    }
    pub fn record_permanent(mut self, enable: bool) -> Self {
        self.overrides.dispatch.record_permanent = Some(enable);
        self
    }
    pub fn max_retries(mut self, value: u32) -> Self {
        self.overrides.retry.max_retries = Some(value);
        self
    }
    pub fn retry_delay(mut self, duration: Duration) -> Self {
        self.overrides.retry.delay = Some(duration.as_secs());
        self
    }
    pub fn failover_on_transient(mut self, enable: bool) -> Self {
        self.overrides.retry.failover_on_transient = Some(enable);
        self
    }
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.overrides.engine.request_timeout = Some(duration.as_secs());
        self
    }
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.overrides.engine.user_agent = Some(value.into());
        self
    }
    pub fn smtp_server(mut self, value: impl Into<String>) -> Self {
        self.overrides.smtp.server = Some(value.into());
        self
    }
    pub fn smtp_port(mut self, value: u16) -> Self {
        self.overrides.smtp.port = Some(value);
        self
    }
    pub fn same_sender_count(mut self, value: usize) -> Self {
        self.overrides.warmup.same_sender_count = Some(value);
        self
    }
    pub fn original_sender_count(mut self, value: usize) -> Self {
        self.overrides.warmup.original_sender_count = Some(value);
        self
    }
    pub fn warmup_sender_count(mut self, value: usize) -> Self {
        self.overrides.warmup.warmup_sender_count = Some(value);
        self
    }

    /// Builds the final `Config` object, applying defaults, file settings,
    /// environment, overrides, and validation.
    pub fn build(mut self) -> Result<Config> {
        let mut loaded_path: Option<String> = None;

        if let Some(ref path) = self.config_file_path {
            match load_config_file(path) {
                Ok(file_config) => {
                    apply_file_config(&mut self.config, &file_config);
                    loaded_path = Some(path.clone());
                    tracing::info!("Loaded base configuration from specified file: {}", path);
                }
                Err(e) => {
                    tracing::error!("Failed to load specified config file '{}': {}", path, e);
                    return Err(AppError::Config(format!(
                        "Failed to load specified configuration file '{}': {:#}",
                        path, e
                    )));
                }
            }
        } else {
            tracing::debug!("No config file specified, checking default locations.");
            for path_str in ["./mail-dispatch.toml", "./config.toml"] {
                if Path::new(path_str).exists() {
                    match load_config_file(path_str) {
                        Ok(file_config) => {
                            apply_file_config(&mut self.config, &file_config);
                            loaded_path = Some(path_str.to_string());
                            tracing::info!(
                                "Loaded base configuration from default location: {}",
                                path_str
                            );
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to load or parse default config '{}': {}",
                                path_str,
                                e
                            );
                        }
                    }
                }
            }
            if loaded_path.is_none() {
                tracing::debug!("No configuration file found. Using defaults and environment.");
            }
        }

        if let Some(ref vars) = self.env {
            apply_env_config(&mut self.config, vars)?;
        }

        apply_file_config(&mut self.config, &self.overrides);
        self.config.loaded_config_path = loaded_path;
        validate_config(&mut self.config)?;

        tracing::debug!("Final configuration built successfully.");
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn overrides_beat_environment_and_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\nworkers = 2\n[smtp]\nserver = \"file.relay\"").unwrap();

        let config = ConfigBuilder::new()
            .config_file(file.path().to_string_lossy())
            .env_vars([
                ("PARALLEL_PROCESSES".to_string(), "5".to_string()),
                ("SMTP_SERVER".to_string(), "env.relay".to_string()),
            ])
            .workers(7)
            .build()
            .unwrap();

        assert_eq!(config.workers, Some(7));
        assert_eq!(config.smtp.server, "env.relay");
        assert!(config.loaded_config_path.is_some());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = ConfigBuilder::new()
            .config_file("/definitely/not/here.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn zero_workers_fail_validation() {
        assert!(ConfigBuilder::new().workers(0).build().is_err());
    }
}
