//! One aggregation cycle: select, dedupe, publish, record.

use crate::aggregator::Aggregator;
use crate::config::FeedSource;
use crate::fetch::PageSource;
use crate::ledger::DedupLedger;
use crate::models::EnrichedItem;
use crate::pool::Pools;
use crate::publish::Publisher;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Counts for one cycle, logged when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub already_delivered: usize,
    /// Same URL selected for more than one category this cycle.
    pub duplicates: usize,
    pub no_destination: usize,
    pub published: usize,
    pub failed: usize,
}

/// Everything a cycle needs, wired once at startup.
pub struct Relay<S, L, P> {
    aggregator: Aggregator<S>,
    ledger: Arc<L>,
    publisher: Arc<P>,
    pools: Pools,
    feeds: Vec<FeedSource>,
    targets: BTreeSet<String>,
    channels: BTreeMap<String, String>,
}

impl<S, L, P> Relay<S, L, P>
where
    S: PageSource,
    L: DedupLedger,
    P: Publisher,
{
    pub fn new(
        aggregator: Aggregator<S>,
        ledger: Arc<L>,
        publisher: Arc<P>,
        pools: Pools,
        feeds: Vec<FeedSource>,
        targets: BTreeSet<String>,
        channels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            aggregator,
            ledger,
            publisher,
            pools,
            feeds,
            targets,
            channels,
        }
    }

    /// Run one full cycle. Never fails; every problem is counted and logged.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> CycleReport {
        let selection = self
            .aggregator
            .select_latest_by_category(&self.feeds, &self.targets)
            .await;

        let mut report = CycleReport {
            selected: selection.len(),
            ..CycleReport::default()
        };
        let mut seen = HashSet::new();
        let mut deliveries = Vec::new();

        for (slug, item) in selection {
            if self.ledger.contains(item.url()) {
                debug!(category = %slug, url = %item.url(), "Already delivered; skipping");
                report.already_delivered += 1;
                continue;
            }
            if !seen.insert(item.url().to_string()) {
                debug!(category = %slug, url = %item.url(), "Selected twice this cycle; skipping");
                report.duplicates += 1;
                continue;
            }
            let Some(destination) = self.channels.get(&slug) else {
                warn!(category = %slug, url = %item.url(), "No destination for category");
                report.no_destination += 1;
                continue;
            };
            deliveries.push(self.deliver(item, destination));
        }

        for delivered in join_all(deliveries).await {
            if delivered {
                report.published += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            selected = report.selected,
            already_delivered = report.already_delivered,
            duplicates = report.duplicates,
            no_destination = report.no_destination,
            published = report.published,
            failed = report.failed,
            ledger_size = self.ledger.len(),
            "Cycle complete"
        );
        report
    }

    /// Publish one item and record it on success. Returns whether the
    /// publisher confirmed delivery.
    async fn deliver(&self, item: EnrichedItem, destination: &str) -> bool {
        let outcome = self
            .pools
            .io
            .run("publish", self.publisher.publish(&item, destination))
            .await;

        match outcome {
            Some(Ok(())) => {
                if let Err(e) = self.ledger.record(item.url()).await {
                    error!(
                        url = %item.url(),
                        error = %e,
                        "Delivered but not recorded; may be sent again after restart"
                    );
                }
                info!(%destination, url = %item.url(), category = %item.category(), "Published");
                true
            }
            Some(Err(e)) => {
                warn!(%destination, url = %item.url(), error = %e, "Publish failed; will retry next cycle");
                false
            }
            None => {
                warn!(%destination, url = %item.url(), "Publish timed out; will retry next cycle");
                false
            }
        }
    }
}
