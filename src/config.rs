use crate::error::{BenchError, Result};
use crate::models::{parse_duration, Overrides, RunOptions};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial run options and overrides
    pub bench: BenchConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Unset values stay empty here; run option defaults fill them in later
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchConfig {
    pub sample_rate: Option<f64>,
    pub period: Option<Duration>,
    /// Origins to fetch (comma-separated)
    pub urls: Vec<String>,
    pub update_url: Option<String>,
    /// Single TLS proxy to benchmark in testing mode
    pub testing_proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            bench: BenchConfig {
                sample_rate: optional_env("PROXYBENCH_SAMPLE_RATE")
                    .map(|raw| {
                        raw.parse::<f64>().map_err(|_| {
                            BenchError::InvalidConfig(
                                "PROXYBENCH_SAMPLE_RATE must be a number".into(),
                            )
                        })
                    })
                    .transpose()?,
                period: optional_env("PROXYBENCH_PERIOD")
                    .map(|raw| {
                        parse_duration(&raw).ok_or_else(|| {
                            BenchError::InvalidConfig(format!(
                                "PROXYBENCH_PERIOD must be a duration like 1h or 90m, got {}",
                                raw
                            ))
                        })
                    })
                    .transpose()?,
                urls: get_env_or("PROXYBENCH_URLS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                update_url: optional_env("PROXYBENCH_UPDATE_URL"),
                testing_proxy: optional_env("PROXYBENCH_TESTING_PROXY"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Initial options before defaults are applied
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            sample_rate: self.bench.sample_rate.unwrap_or_default(),
            period: self.bench.period.unwrap_or_default(),
            proxies: Vec::new(),
            urls: self.bench.urls.clone(),
            update_url: self.bench.update_url.clone().unwrap_or_default(),
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            testing_proxy: self.bench.testing_proxy.clone(),
        }
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        !self.log.format.eq_ignore_ascii_case("pretty")
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-blank environment variable
fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
