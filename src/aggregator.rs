//! Per-category selection of the latest feed items.
//!
//! Feeds are assumed to list items most-recent-first, so the first item seen
//! for a category is taken as that category's latest. Nothing checks this
//! ordering; a feed that violates it can let a stale item win.
//!
//! Each feed source is scanned independently and concurrently. Within one
//! source:
//!
//! 1. items are walked in document order
//! 2. the raw label is normalized to a slug; non-target slugs are skipped
//! 3. the first item for a slug claims it and its enrichment starts at once
//! 4. scanning stops as soon as every target slug is claimed
//! 5. all enrichments are joined; a failed one drops only its category
//!
//! Sources are merged in configuration order once all have finished, so a
//! later source overwrites an earlier one for the same category.

use crate::config::FeedSource;
use crate::enrich::{Enricher, SourceProfile};
use crate::feed::parse_items;
use crate::fetch::PageSource;
use crate::models::{CategorySelection, EnrichedItem};
use crate::taxonomy::Taxonomy;
use crate::utils::truncate_for_log;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one item offered to a [`ClaimBook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// First item for its category; carries the claim order.
    Claimed(u64),
    /// The category already has a candidate.
    Taken,
    /// Not a target category.
    Untargeted,
}

/// First-seen-wins bookkeeping for one scan of one feed.
#[derive(Debug)]
pub struct ClaimBook<'a> {
    targets: &'a BTreeSet<String>,
    next_order: u64,
    claims: BTreeMap<String, u64>,
}

impl<'a> ClaimBook<'a> {
    pub fn new(targets: &'a BTreeSet<String>) -> Self {
        Self {
            targets,
            next_order: 0,
            claims: BTreeMap::new(),
        }
    }

    pub fn offer(&mut self, slug: &str) -> Offer {
        if !self.targets.contains(slug) {
            return Offer::Untargeted;
        }
        if self.claims.contains_key(slug) {
            return Offer::Taken;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.claims.insert(slug.to_string(), order);
        Offer::Claimed(order)
    }

    /// Every target has a candidate.
    pub fn is_complete(&self) -> bool {
        self.claims.len() >= self.targets.len()
    }
}

/// Result of scanning one source.
#[derive(Debug, Default)]
struct SourceOutcome {
    selection: CategorySelection,
    /// Items examined before the scan stopped.
    scanned: usize,
}

pub struct Aggregator<S> {
    enricher: Enricher<S>,
    taxonomy: Arc<Taxonomy>,
}

impl<S: PageSource> Aggregator<S> {
    pub fn new(enricher: Enricher<S>, taxonomy: Taxonomy) -> Self {
        Self {
            enricher,
            taxonomy: Arc::new(taxonomy),
        }
    }

    /// Fetch every feed and return at most one enriched item per target
    /// category.
    ///
    /// # Arguments
    ///
    /// * `feeds` - Sources in configuration order
    /// * `targets` - Normalized category slugs to fill
    ///
    /// # Returns
    ///
    /// A map from slug to enriched item. Feeds are scanned concurrently and
    /// merged in configuration order, so a later source replaces an earlier
    /// one's pick for the same slug. Unreachable or malformed sources
    /// contribute nothing.
    #[instrument(level = "info", skip_all, fields(feeds = feeds.len(), targets = targets.len()))]
    pub async fn select_latest_by_category(
        &self,
        feeds: &[FeedSource],
        targets: &BTreeSet<String>,
    ) -> CategorySelection {
        let outcomes = join_all(feeds.iter().map(|feed| self.select_from_feed(feed, targets))).await;

        let mut selection = CategorySelection::new();
        for (feed, outcome) in feeds.iter().zip(outcomes) {
            for (slug, item) in outcome.selection {
                if let Some(previous) = selection.insert(slug, item) {
                    debug!(
                        feed = %feed.url,
                        category = %previous.category(),
                        replaced = %previous.url(),
                        "Later source overrides category"
                    );
                }
            }
        }

        info!(
            selected = selection.len(),
            categories = %itertools::join(selection.keys(), ", "),
            "Category selection complete"
        );
        selection
    }

    #[instrument(level = "info", skip_all, fields(feed = %feed.url))]
    async fn select_from_feed(&self, feed: &FeedSource, targets: &BTreeSet<String>) -> SourceOutcome {
        let pools = self.enricher.pools();
        let fetched = pools
            .io
            .run("fetch feed", self.enricher.source().fetch_page(&feed.url))
            .await;
        let body = match fetched {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                warn!(error = %e, "Feed fetch failed; source contributes nothing");
                return SourceOutcome::default();
            }
            None => return SourceOutcome::default(),
        };

        let items = match parse_items(&body) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    error = %e,
                    preview = %truncate_for_log(&body, 200),
                    "Malformed feed; source contributes nothing"
                );
                return SourceOutcome::default();
            }
        };

        let profile = Arc::new(SourceProfile {
            name: feed.display_name(),
            content_selector: feed.content_selector.clone(),
        });
        let total = items.len();
        let mut book = ClaimBook::new(targets);
        let mut scanned = 0;
        let mut pending: Vec<(String, JoinHandle<Option<EnrichedItem>>)> = Vec::new();

        for item in items {
            if book.is_complete() {
                debug!(scanned, total, "All target categories claimed; stopping scan");
                break;
            }
            scanned += 1;
            let slug = self.taxonomy.normalize(&item.category);
            match book.offer(&slug) {
                Offer::Claimed(order) => {
                    debug!(category = %slug, order, url = %item.link, "Claimed category");
                    let enricher = self.enricher.clone();
                    let profile = Arc::clone(&profile);
                    let category = slug.clone();
                    let task =
                        tokio::spawn(async move { enricher.enrich(item, category, &profile).await });
                    pending.push((slug, task));
                }
                Offer::Taken => debug!(category = %slug, url = %item.link, "Category already claimed"),
                Offer::Untargeted => {}
            }
        }

        let (slugs, tasks): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let mut selection = CategorySelection::new();
        for (slug, joined) in slugs.into_iter().zip(join_all(tasks).await) {
            match joined {
                Ok(Some(item)) => {
                    selection.insert(slug, item);
                }
                Ok(None) => warn!(category = %slug, "Enrichment timed out; dropping category"),
                Err(e) => error!(category = %slug, error = %e, "Enrichment failed; dropping category"),
            }
        }

        info!(
            source = %profile.name,
            total,
            scanned,
            selected = selection.len(),
            "Scanned feed"
        );
        SourceOutcome { selection, scanned }
    }
}
