//! Data models shared by the aggregation pipeline.
//!
//! - [`FeedItem`]: one raw `<item>` as parsed from a feed
//! - [`EnrichedItem`]: the immutable, deliverable result of enrichment
//! - [`CategorySelection`]: at most one enriched item per category slug
//! - [`PoolSnapshot`]: a point-in-time reading of one worker pool

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw feed entry before enrichment.
///
/// Every field is taken verbatim from the feed (trimmed); empty strings stand
/// for missing elements. Items live only for the duration of one aggregation
/// pass over a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    /// Article URL from `<link>`.
    pub link: String,
    /// Raw category label from `<category>`, before translation.
    pub category: String,
    pub description: String,
    /// `url` attribute of `<enclosure>`, if any.
    pub enclosure_url: Option<String>,
}

/// A fully resolved article, ready for delivery.
///
/// Constructed once by the enricher's merge step and never mutated. The
/// canonical `url` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedItem {
    title: String,
    url: String,
    source: String,
    image_url: String,
    description: String,
    category: String,
}

impl EnrichedItem {
    pub fn new(
        title: String,
        url: String,
        source: String,
        image_url: String,
        description: String,
        category: String,
    ) -> Self {
        Self {
            title,
            url,
            source,
            image_url,
            description,
            category,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolved image URL; empty when no usable image was found.
    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    /// Resolved description; empty when none could be extracted.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Canonical category slug.
    pub fn category(&self) -> &str {
        &self.category
    }
}

/// Category slug → selected item, rebuilt from scratch on every cycle.
pub type CategorySelection = BTreeMap<String, EnrichedItem>;

/// Point-in-time state of one worker pool. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub name: String,
    /// Tasks currently running.
    pub active_count: usize,
    /// Slots currently provisioned (core plus any burst slots in use).
    pub pool_size: usize,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    /// Tasks waiting for a core slot.
    pub queue_size: usize,
    /// Free queue positions left.
    pub queue_remaining: usize,
    pub completed_task_count: u64,
    pub task_count: u64,
}

/// Derive a display name for a feed from its host, e.g.
/// `https://lenta.ru/rss/news` → `lenta.ru`.
pub fn source_name_from_url(feed_url: &str) -> Option<String> {
    let parsed = url::Url::parse(feed_url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}
