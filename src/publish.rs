//! Delivery of enriched items.
//!
//! The cycle hands each item to a [`Publisher`] along with the destination
//! its category maps to, and records the URL in the ledger only when the
//! publisher reports success. Two publishers ship with the relay:
//!
//! | Publisher | Behaviour |
//! |-----------|-----------|
//! | [`LogPublisher`] | logs the delivery; always succeeds |
//! | [`OutboxPublisher`] | writes one JSON file per item |
//!
//! # Outbox Layout
//!
//! ```text
//! outbox_dir/
//! └── 2025-05-06/
//!     └── @world_news/
//!         └── first-headline-1a2b3c4d.json
//! ```

use crate::error::PublishError;
use crate::models::EnrichedItem;
use crate::utils::{slugify_title, truncate_for_log};
use chrono::Local;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

pub trait Publisher: Send + Sync + 'static {
    /// Deliver `item` to `destination`. `Ok` means the delivery is confirmed.
    fn publish(
        &self,
        item: &EnrichedItem,
        destination: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Publisher that only logs. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(
        &self,
        item: &EnrichedItem,
        destination: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send {
        info!(
            %destination,
            url = %item.url(),
            title = %item.title(),
            source = %item.source(),
            image = %item.image_url(),
            description = %truncate_for_log(item.description(), 160),
            "Delivered item"
        );
        std::future::ready(Ok(()))
    }
}

/// Publisher that drops each item into a dated, per-destination directory
/// for another process to pick up.
#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    root: PathBuf,
}

impl OutboxPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{local date}/{destination}/{slug}-{url hash}.json`
    ///
    /// The hash suffix keeps two items with the same title apart.
    fn item_path(&self, item: &EnrichedItem, destination: &str) -> PathBuf {
        let date = Local::now().date_naive().to_string();
        let mut slug = slugify_title(item.title());
        if slug.is_empty() {
            slug = "item".to_string();
        }
        self.root
            .join(date)
            .join(sanitize_component(destination))
            .join(format!("{slug}-{}.json", url_tag(item.url())))
    }
}

impl Publisher for OutboxPublisher {
    fn publish(
        &self,
        item: &EnrichedItem,
        destination: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send {
        let path = self.item_path(item, destination);
        let json = serde_json::to_string_pretty(item);
        let destination = destination.to_string();
        async move {
            if destination.trim().is_empty() {
                return Err(PublishError::Rejected {
                    destination,
                    reason: "empty destination".to_string(),
                });
            }
            write_item(&path, json?, &destination).await
        }
    }
}

#[instrument(level = "info", skip_all, fields(path = %path.display(), %destination))]
async fn write_item(path: &Path, json: String, destination: &str) -> Result<(), PublishError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(path, json).await?;
    info!("Wrote item to outbox");
    Ok(())
}

/// First 8 hex digits of the URL's SHA-256.
fn url_tag(url: &str) -> String {
    let hash = format!("{:x}", Sha256::digest(url.as_bytes()));
    hash[..8].to_string()
}

/// Keep a destination usable as one path component.
fn sanitize_component(destination: &str) -> String {
    let cleaned: String = destination
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}
