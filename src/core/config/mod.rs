//! Runtime configuration: the `Config` struct, its TOML file representation and the
//! builder that merges defaults, file settings and explicit overrides.

mod builder;
mod loading;
mod validation;

pub use builder::ConfigBuilder;

use crate::core::models::Bucket;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub(crate) use crate::core::error::Result;

/// Default provider endpoint.
pub const DEFAULT_API_URL: &str = "https://happy.mailtester.ninja/ninja";

/// Effective settings for one run of the pipeline.
#[derive(Clone)]
pub struct Config {
    // Provider
    pub api_key: String,
    pub api_url: String,
    pub request_timeout: Duration,
    pub user_agent: String,

    // Rate gate
    pub rate_ceiling: usize,
    pub rate_window: Duration,
    pub min_spacing: Duration,
    pub window_safety_buffer: Duration,
    pub acquire_timeout: Option<Duration>,

    // Pipeline
    pub max_concurrency: usize,
    pub default_bucket: Bucket,
    pub max_candidates: Option<usize>,
    pub stop_on_catch_all: bool,
    pub pattern_catalog_path: Option<String>,
    pub cost_per_verification: f64,

    pub loaded_config_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("email-prospector/{}", env!("CARGO_PKG_VERSION")),
            rate_ceiling: 170,
            rate_window: Duration::from_millis(30_000),
            min_spacing: Duration::from_millis(176),
            window_safety_buffer: Duration::from_millis(100),
            acquire_timeout: Some(Duration::from_secs(300)),
            max_concurrency: 4,
            default_bucket: Bucket::Medium,
            max_candidates: None,
            stop_on_catch_all: false,
            pattern_catalog_path: None,
            cost_per_verification: 0.002,
            loaded_config_path: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Config")
            .field("api_key", &key)
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .field("user_agent", &self.user_agent)
            .field("rate_ceiling", &self.rate_ceiling)
            .field("rate_window", &self.rate_window)
            .field("min_spacing", &self.min_spacing)
            .field("window_safety_buffer", &self.window_safety_buffer)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_concurrency", &self.max_concurrency)
            .field("default_bucket", &self.default_bucket)
            .field("max_candidates", &self.max_candidates)
            .field("stop_on_catch_all", &self.stop_on_catch_all)
            .field("pattern_catalog_path", &self.pattern_catalog_path)
            .field("cost_per_verification", &self.cost_per_verification)
            .field("loaded_config_path", &self.loaded_config_path)
            .finish()
    }
}

impl Config {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Shape of the TOML configuration file. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub provider: ProviderSection,
    pub rate_limit: RateLimitSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Seconds.
    pub request_timeout: Option<u64>,
    /// Milliseconds; takes precedence over `request_timeout` when both are set.
    pub request_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub ceiling: Option<usize>,
    pub window_ms: Option<u64>,
    pub min_spacing_ms: Option<u64>,
    pub safety_buffer_ms: Option<u64>,
    /// Seconds; `0` waits without bound.
    pub acquire_timeout_secs: Option<u64>,
    /// Milliseconds; takes precedence over `acquire_timeout_secs`, `0` waits without bound.
    pub acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_concurrency: Option<usize>,
    pub default_bucket: Option<Bucket>,
    pub max_candidates: Option<usize>,
    pub stop_on_catch_all: Option<bool>,
    pub pattern_catalog: Option<String>,
    pub cost_per_verification: Option<f64>,
}
