//! Contains validation logic for the final Config struct.

use super::{Config, Result};
use crate::core::catalog::PATTERNS_PER_BUCKET;
use crate::core::error::AppError;
use std::time::Duration;
use url::Url;

/// Upper bound for every rate-gate interval.
pub(crate) const MAX_RATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validates the configuration settings after loading and potential overrides.
/// Mutates the config to clamp values where a sensible fix exists; rejects the rest.
pub(crate) fn validate_config(config: &mut Config) -> Result<()> {
    match Url::parse(&config.api_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            return Err(AppError::Config(format!(
                "Provider URL must use http or https, got '{}'",
                url.scheme()
            )))
        }
        Err(e) => {
            return Err(AppError::Config(format!(
                "Invalid provider URL '{}': {}",
                config.api_url, e
            )))
        }
    }
    config.api_key = config.api_key.trim().to_string();
    if config.api_key.is_empty() {
        tracing::debug!("No provider API key configured; verification will be unavailable.");
    }
    if config.request_timeout.is_zero() {
        return Err(AppError::Config(
            "Request timeout must be greater than zero.".to_string(),
        ));
    }

    if config.rate_ceiling == 0 {
        return Err(AppError::Config(
            "Rate ceiling must allow at least one request per window.".to_string(),
        ));
    }
    if config.rate_window.is_zero() {
        return Err(AppError::Config(
            "Rate window must be greater than zero.".to_string(),
        ));
    }
    for (name, value) in [
        ("Rate window", config.rate_window),
        ("Minimum spacing", config.min_spacing),
        ("Window safety buffer", config.window_safety_buffer),
    ] {
        if value > MAX_RATE_INTERVAL {
            return Err(AppError::Config(format!(
                "{} ({:?}) exceeds the {:?} maximum.",
                name, value, MAX_RATE_INTERVAL
            )));
        }
    }
    if config.min_spacing > config.rate_window {
        tracing::warn!(
            "Minimum spacing ({:?}) exceeds the rate window ({:?}); the window will never fill.",
            config.min_spacing,
            config.rate_window
        );
    }
    if let Some(timeout) = config.acquire_timeout {
        if timeout.is_zero() {
            tracing::warn!("Acquire timeout of zero would fail every request. Disabling the timeout.");
            config.acquire_timeout = None;
        } else if timeout < config.rate_window {
            tracing::warn!(
                "Acquire timeout ({:?}) is shorter than the rate window ({:?}); saturated batches will time out.",
                timeout,
                config.rate_window
            );
        }
    }

    if config.max_concurrency == 0 {
        tracing::warn!("Max concurrency was set to 0. Setting to 1.");
        config.max_concurrency = 1;
    }
    match config.max_candidates {
        Some(0) => {
            tracing::warn!("Max candidates of 0 would skip verification entirely. Using all candidates.");
            config.max_candidates = None;
        }
        Some(n) if n > PATTERNS_PER_BUCKET => {
            tracing::debug!(
                "Max candidates ({}) exceeds the {} patterns per bucket; it has no effect.",
                n,
                PATTERNS_PER_BUCKET
            );
            config.max_candidates = None;
        }
        _ => {}
    }
    if !config.cost_per_verification.is_finite() || config.cost_per_verification < 0.0 {
        return Err(AppError::Config(format!(
            "Cost per verification must be a non-negative number, got {}",
            config.cost_per_verification
        )));
    }
    if let Some(ref path) = config.pattern_catalog_path {
        if path.is_empty() {
            tracing::warn!("Provided pattern catalog path is empty. Using the built-in catalog.");
            config.pattern_catalog_path = None;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = Config::default();
        assert!(validate_config(&mut config).is_ok());
    }

    #[test]
    fn test_clamps() {
        let mut config = Config {
            max_concurrency: 0,
            max_candidates: Some(0),
            acquire_timeout: Some(Duration::ZERO),
            api_key: "  key ".to_string(),
            ..Config::default()
        };
        validate_config(&mut config).unwrap();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.max_candidates, None);
        assert_eq!(config.acquire_timeout, None);
        assert_eq!(config.api_key, "key");
    }

    #[test]
    fn test_longest_window_is_accepted() {
        let mut config = Config {
            rate_window: MAX_RATE_INTERVAL,
            acquire_timeout: None,
            ..Config::default()
        };
        assert!(validate_config(&mut config).is_ok());
    }

    #[test]
    fn test_rejections() {
        for config in [
            Config {
                rate_ceiling: 0,
                ..Config::default()
            },
            Config {
                rate_window: Duration::ZERO,
                ..Config::default()
            },
            Config {
                api_url: "ftp://example.com".to_string(),
                ..Config::default()
            },
            Config {
                api_url: "not a url".to_string(),
                ..Config::default()
            },
            Config {
                rate_window: Duration::from_secs(u64::MAX),
                ..Config::default()
            },
            Config {
                window_safety_buffer: MAX_RATE_INTERVAL + Duration::from_millis(1),
                ..Config::default()
            },
            Config {
                cost_per_verification: -1.0,
                ..Config::default()
            },
        ] {
            let mut config = config;
            assert!(
                matches!(validate_config(&mut config), Err(AppError::Config(_))),
                "{:?}",
                config
            );
        }
    }
}
