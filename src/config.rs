//! YAML configuration for the relay.
//!
//! Every section falls back to the defaults the service has always run with,
//! so an empty file (or no file at all) produces a working configuration for
//! a single Lenta.ru feed. Values are validated once in [`RelayConfig::load`];
//! components can then build regexes and selectors from them without
//! re-checking.

use crate::error::ConfigError;
use crate::fetch::RequestPolicy;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub feeds: Vec<FeedSource>,
    /// Source-language label → canonical slug.
    pub categories: BTreeMap<String, String>,
    /// Explicit target set; defaults to the slugs of `categories`.
    pub target_categories: Option<BTreeSet<String>>,
    /// Slug → destination identifier handed to the publisher.
    pub channels: BTreeMap<String, String>,
    pub request: RequestSettings,
    pub enrichment: EnrichmentSettings,
    pub pools: PoolsSettings,
    pub schedule: ScheduleSettings,
    pub ledger_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let categories = [
            ("Бывший СССР", "former_ussr"),
            ("Россия", "russia"),
            ("Мир", "world"),
            ("Экономика", "economy"),
        ]
        .into_iter()
        .map(|(label, slug)| (label.to_string(), slug.to_string()))
        .collect();

        Self {
            feeds: vec![FeedSource {
                url: "https://lenta.ru/rss/news".to_string(),
                name: Some("Lenta.ru".to_string()),
                content_selector: Some(".topic-body__content p".to_string()),
            }],
            categories,
            target_categories: None,
            channels: BTreeMap::new(),
            request: RequestSettings::default(),
            enrichment: EnrichmentSettings::default(),
            pools: PoolsSettings::default(),
            schedule: ScheduleSettings::default(),
            ledger_path: "sent_news.txt".to_string(),
        }
    }
}

/// One feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub url: String,
    /// Display name; the URL host is used when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// CSS selector for the article body paragraphs on this source's pages.
    #[serde(default)]
    pub content_selector: Option<String>,
}

impl FeedSource {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| crate::models::source_name_from_url(&self.url))
            .unwrap_or_else(|| self.url.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 30_000,
            max_timeout_ms: 60_000,
            retry_delay_ms: 1_000,
            user_agent: "Mozilla/5.0".to_string(),
        }
    }
}

impl RequestSettings {
    pub fn policy(&self) -> RequestPolicy {
        RequestPolicy {
            max_retries: self.max_retries,
            initial_timeout: Duration::from_millis(self.timeout_ms),
            max_timeout: Duration::from_millis(self.max_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    /// Feed descriptions shorter than this (in characters) are replaced by
    /// text pulled from the article page.
    pub min_description_chars: usize,
    /// Hard cap on article fetches while hunting for a non-placeholder image.
    pub image_attempt_cap: u32,
    pub image_retry_delay_ms: u64,
    /// Extra attempts granted when an image matches neither pattern.
    pub unexpected_image_retries: u32,
    pub placeholder_pattern: String,
    pub valid_image_pattern: String,
    pub generic_content_selectors: Vec<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            min_description_chars: 100,
            image_attempt_cap: 5,
            image_retry_delay_ms: 5_000,
            unexpected_image_retries: 2,
            placeholder_pattern: r".*/assets/webpack/images/lenta_og\.[a-f0-9]+\.png$".to_string(),
            valid_image_pattern: r".*/images/\d+/\d+/\d+/\d+/.*\.jpg$".to_string(),
            generic_content_selectors: [
                "article p",
                ".article p",
                ".news-text p",
                ".entry-content p",
                ".post-content p",
                ".content p",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub min_size: usize,
    pub absolute_max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    pub io_high_load_threshold: f64,
    pub io_low_load_threshold: f64,
    pub cpu_high_load_threshold: f64,
    pub cpu_low_load_threshold: f64,
    pub scale_factor: f64,
    pub adjustment_interval_ms: u64,
    pub metrics_interval_ms: u64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            io_high_load_threshold: 0.7,
            io_low_load_threshold: 0.3,
            cpu_high_load_threshold: 0.8,
            cpu_low_load_threshold: 0.4,
            scale_factor: 1.5,
            adjustment_interval_ms: 300_000,
            metrics_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsSettings {
    pub io: PoolSettings,
    pub cpu: PoolSettings,
    pub adaptive: AdaptiveSettings,
    pub task_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for PoolsSettings {
    fn default() -> Self {
        Self {
            io: PoolSettings {
                core_size: 10,
                max_size: 50,
                queue_capacity: 100,
                min_size: 5,
                absolute_max_size: 100,
            },
            cpu: PoolSettings {
                core_size: 4,
                max_size: 8,
                queue_capacity: 50,
                min_size: 2,
                absolute_max_size: 16,
            },
            adaptive: AdaptiveSettings::default(),
            task_timeout_ms: 30_000,
            shutdown_grace_ms: 60_000,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolsSettings::default().io
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_ms: 600_000,
        }
    }
}

impl RelayConfig {
    /// Read and validate a config file. A missing file yields the defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file not found; using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = if text.trim().is_empty() {
            RelayConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Categories a cycle tries to fill.
    pub fn targets(&self) -> BTreeSet<String> {
        self.target_categories
            .clone()
            .unwrap_or_else(|| self.categories.values().cloned().collect())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("at least one feed is required".into()));
        }
        for feed in &self.feeds {
            url::Url::parse(&feed.url)
                .map_err(|e| ConfigError::Invalid(format!("feed url {}: {e}", feed.url)))?;
            if let Some(selector) = &feed.content_selector {
                check_selector(selector)?;
            }
        }

        let enrichment = &self.enrichment;
        for pattern in [
            &enrichment.placeholder_pattern,
            &enrichment.valid_image_pattern,
        ] {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("pattern {pattern}: {e}")))?;
        }
        for selector in &enrichment.generic_content_selectors {
            check_selector(selector)?;
        }
        if enrichment.image_attempt_cap == 0 {
            return Err(ConfigError::Invalid(
                "enrichment.image_attempt_cap must be at least 1".into(),
            ));
        }

        for (name, pool) in [("io", &self.pools.io), ("cpu", &self.pools.cpu)] {
            if pool.core_size == 0 || pool.core_size > pool.max_size {
                return Err(ConfigError::Invalid(format!(
                    "pools.{name}: need 0 < core_size <= max_size"
                )));
            }
            if pool.min_size == 0 || pool.min_size > pool.absolute_max_size {
                return Err(ConfigError::Invalid(format!(
                    "pools.{name}: need 0 < min_size <= absolute_max_size"
                )));
            }
        }

        let adaptive = &self.pools.adaptive;
        if adaptive.scale_factor <= 1.0 {
            return Err(ConfigError::Invalid(
                "pools.adaptive.scale_factor must be greater than 1".into(),
            ));
        }
        if adaptive.io_low_load_threshold >= adaptive.io_high_load_threshold
            || adaptive.cpu_low_load_threshold >= adaptive.cpu_high_load_threshold
        {
            return Err(ConfigError::Invalid(
                "pools.adaptive: low thresholds must be below high thresholds".into(),
            ));
        }
        if adaptive.adjustment_interval_ms == 0
            || adaptive.metrics_interval_ms == 0
            || self.schedule.interval_ms == 0
        {
            return Err(ConfigError::Invalid(
                "adjustment, metrics and schedule intervals must be positive".into(),
            ));
        }
        if self.request.max_timeout_ms < self.request.timeout_ms {
            return Err(ConfigError::Invalid(
                "request.max_timeout_ms must not be below request.timeout_ms".into(),
            ));
        }
        Ok(())
    }
}

fn check_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("selector {selector:?}: {e}")))
}
