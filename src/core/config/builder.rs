//! Provides the `ConfigBuilder` for fluent configuration construction.

use super::loading::{apply_file_config, load_config_file};
use super::validation::validate_config;
use super::{Config, ConfigFile, Result};
use crate::core::models::Bucket;
use crate::AppError;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["./email-prospector.toml", "./config.toml"];

/// Builder pattern for creating `Config` instances fluently.
///
/// Precedence, lowest first: built-in defaults, the configuration file, then the
/// values set on the builder. The result is validated before it is returned.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    config_file_path: Option<String>,
    skip_default_locations: bool,
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

    /// Do not probe the working directory for a configuration file.
    pub fn skip_default_locations(mut self) -> Self {
        self.skip_default_locations = true;
        self
    }

    pub fn api_key(mut self, value: impl Into<String>) -> Self {
        self.overrides.provider.api_key = Some(value.into());
        self
    }
    pub fn api_url(mut self, value: impl Into<String>) -> Self {
        self.overrides.provider.api_url = Some(value.into());
        self
    }
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.overrides.provider.request_timeout_ms = Some(whole_millis(duration));
        self
    }
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.overrides.provider.user_agent = Some(value.into());
        self
    }
    pub fn rate_ceiling(mut self, value: usize) -> Self {
        self.overrides.rate_limit.ceiling = Some(value);
        self
    }
    pub fn rate_window(mut self, duration: Duration) -> Self {
        self.overrides.rate_limit.window_ms = Some(whole_millis(duration));
        self
    }
    pub fn min_spacing(mut self, duration: Duration) -> Self {
        self.overrides.rate_limit.min_spacing_ms = Some(whole_millis(duration));
        self
    }
    pub fn window_safety_buffer(mut self, duration: Duration) -> Self {
        self.overrides.rate_limit.safety_buffer_ms = Some(whole_millis(duration));
        self
    }
    /// `None` lets callers wait for a slot without bound.
    pub fn acquire_timeout(mut self, duration: Option<Duration>) -> Self {
        self.overrides.rate_limit.acquire_timeout_ms = Some(duration.map_or(0, whole_millis));
        self
    }
    pub fn max_concurrency(mut self, value: usize) -> Self {
        self.overrides.pipeline.max_concurrency = Some(value);
        self
    }
    pub fn default_bucket(mut self, bucket: Bucket) -> Self {
        self.overrides.pipeline.default_bucket = Some(bucket);
        self
    }
    pub fn max_candidates(mut self, value: usize) -> Self {
        self.overrides.pipeline.max_candidates = Some(value);
        self
    }
    pub fn stop_on_catch_all(mut self, enable: bool) -> Self {
        self.overrides.pipeline.stop_on_catch_all = Some(enable);
        self
    }
    pub fn pattern_catalog_path(mut self, path: impl Into<String>) -> Self {
        self.overrides.pipeline.pattern_catalog = Some(path.into());
        self
    }
    pub fn cost_per_verification(mut self, value: f64) -> Self {
        self.overrides.pipeline.cost_per_verification = Some(value);
        self
    }

    /// Builds the final `Config` object, applying defaults, file settings, overrides, and validation.
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
                    tracing::error!("Failed to load specified config file '{}': {:#}", path, e);
                    return Err(AppError::Config(format!(
                        "Failed to load specified configuration file '{}': {:#}",
                        path, e
                    )));
                }
            }
        } else if !self.skip_default_locations {
            tracing::debug!("No config file specified, checking default locations.");
            for path_str in DEFAULT_CONFIG_LOCATIONS {
                if Path::new(path_str).exists() {
                    tracing::debug!("Found potential default config file: {}", path_str);
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
                                "Failed to load or parse default config '{}': {:#}",
                                path_str,
                                e
                            );
                        }
                    }
                }
            }
            if loaded_path.is_none() {
                tracing::info!("No configuration file found. Using default values and overrides.");
            }
        }

        apply_file_config(&mut self.config, &self.overrides);
        self.config.loaded_config_path = loaded_path;
        validate_config(&mut self.config)?;

        tracing::debug!("Final configuration built successfully: {:?}", self.config);
        Ok(self.config)
    }
}

/// Millisecond resolution, rounding a non-zero sub-millisecond duration up to 1 ms so
/// it never collapses into the "unset" zero.
fn whole_millis(duration: Duration) -> u64 {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 && !duration.is_zero() {
        1
    } else {
        millis
    }
}
