use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::prefetch::PrefetchPolicy;
use crate::core::query::QueryOptions;
use crate::core::retry::RetryPolicy;

/// Top-level configuration, usually read from `feedline.yaml`.
///
/// Every section and field is optional; missing values fall back to the
/// built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedlineConfig {
    pub api: ApiConfig,
    pub query: QueryConfig,
    pub retry: RetryConfig,
    pub prefetch: PrefetchConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub stale_time_secs: u64,
    pub gc_time_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 0,
            gc_time_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub min_index: usize,
    pub viewport_ratio: f64,
    pub idle_delay_ms: u64,
    pub scroll_debounce_ms: u64,
    pub scroll_min_items: usize,
    pub momentum_min_items: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            min_index: 10,
            viewport_ratio: 0.7,
            idle_delay_ms: 2_000,
            scroll_debounce_ms: 100,
            scroll_min_items: 5,
            momentum_min_items: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Where the bearer token and last known user are persisted
    pub store_path: Option<PathBuf>,
}

impl FeedlineConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config YAML {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: FeedlineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prefetch.viewport_ratio) {
            anyhow::bail!(
                "prefetch.viewport_ratio must be between 0 and 1, got {}",
                self.prefetch.viewport_ratio
            );
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            stale_time: Duration::from_secs(self.query.stale_time_secs),
            gc_time: Duration::from_secs(self.query.gc_time_secs),
            enabled: true,
            retry: self.retry_policy(),
        }
    }

    pub fn prefetch_policy(&self) -> PrefetchPolicy {
        let p = &self.prefetch;
        PrefetchPolicy {
            min_index: p.min_index,
            viewport_ratio: p.viewport_ratio,
            idle_delay: Duration::from_millis(p.idle_delay_ms),
            scroll_debounce: Duration::from_millis(p.scroll_debounce_ms),
            scroll_min_items: p.scroll_min_items,
            momentum_min_items: p.momentum_min_items,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}
