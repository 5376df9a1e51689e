//! Handles loading configuration from files and applying it to the Config struct.

use super::{Config, ConfigFile};
use anyhow::Context;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Loads configuration settings from a TOML file.
/// Returns the parsed `ConfigFile` content.
pub(crate) fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!(
            "File not found or is not a file: {}",
            file_path
        ));
    }
    tracing::debug!("Attempting to read config file: {}", file_path);
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    tracing::debug!("Attempting to parse TOML from: {}", file_path);
    let config_file_content: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::debug!("Successfully parsed configuration file: {}", file_path);
    Ok(config_file_content)
}

/// Applies settings from a parsed `ConfigFile` onto a mutable `Config` instance.
/// Only fields present in the file are touched, so layers merge.
pub(crate) fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    // Provider
    if let Some(ref key) = file_config.provider.api_key {
        config.api_key = key.trim().to_string();
    }
    if let Some(ref url) = file_config.provider.api_url {
        config.api_url = url.trim().to_string();
    }
    if let Some(timeout) = file_config.provider.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(millis) = file_config.provider.request_timeout_ms {
        config.request_timeout = Duration::from_millis(millis);
    }
    if let Some(ref user_agent) = file_config.provider.user_agent {
        config.user_agent = user_agent.clone();
    }

    // Rate gate
    if let Some(ceiling) = file_config.rate_limit.ceiling {
        config.rate_ceiling = ceiling;
    }
    if let Some(window) = file_config.rate_limit.window_ms {
        config.rate_window = Duration::from_millis(window);
    }
    if let Some(spacing) = file_config.rate_limit.min_spacing_ms {
        config.min_spacing = Duration::from_millis(spacing);
    }
    if let Some(buffer) = file_config.rate_limit.safety_buffer_ms {
        config.window_safety_buffer = Duration::from_millis(buffer);
    }
    if let Some(secs) = file_config.rate_limit.acquire_timeout_secs {
        config.acquire_timeout = if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        };
    }
    if let Some(millis) = file_config.rate_limit.acquire_timeout_ms {
        config.acquire_timeout = if millis == 0 {
            None
        } else {
            Some(Duration::from_millis(millis))
        };
    }

    // Pipeline
    if let Some(concurrency) = file_config.pipeline.max_concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(bucket) = file_config.pipeline.default_bucket {
        config.default_bucket = bucket;
    }
    if let Some(limit) = file_config.pipeline.max_candidates {
        config.max_candidates = Some(limit);
    }
    if let Some(stop) = file_config.pipeline.stop_on_catch_all {
        config.stop_on_catch_all = stop;
    }
    if let Some(ref path) = file_config.pipeline.pattern_catalog {
        if !path.trim().is_empty() {
            config.pattern_catalog_path = Some(path.trim().to_string());
        } else {
            config.pattern_catalog_path = None;
        }
    }
    if let Some(cost) = file_config.pipeline.cost_per_verification {
        config.cost_per_verification = cost;
    }
}
