//! Enrichment of selected feed items.
//!
//! A [`FeedItem`] carries whatever the feed chose to include, which for many
//! sources is a generic placeholder image and a one-line lead. The
//! [`Enricher`] turns it into an [`EnrichedItem`] by resolving two fields
//! independently and in parallel on the I/O pool:
//!
//! - **image**: the enclosure when it is not a placeholder, else the
//!   article's `og:image`, re-fetched with a fixed delay while the page keeps
//!   serving the placeholder
//! - **description**: the feed text when it is long enough, else paragraphs
//!   scraped from the article page
//!
//! Both results are merged into the immutable item on the CPU pool. Failures
//! inside either resolution degrade that field to an empty string.

use crate::config::EnrichmentSettings;
use crate::error::ConfigError;
use crate::fetch::PageSource;
use crate::models::{EnrichedItem, FeedItem};
use crate::pool::Pools;
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

static META_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).expect("static selector"));
static META_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).expect("static selector"));

/// Per-source details the enricher needs alongside each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    pub name: String,
    /// Selector for this source's article body paragraphs, tried before the
    /// generic ones.
    pub content_selector: Option<String>,
}

#[derive(Debug)]
struct Rules {
    placeholder: Regex,
    valid_image: Regex,
    generic_selectors: Vec<String>,
    min_description_chars: usize,
    image_attempt_cap: u32,
    image_retry_delay: Duration,
    unexpected_image_retries: u32,
}

pub struct Enricher<S> {
    source: Arc<S>,
    pools: Pools,
    rules: Arc<Rules>,
}

impl<S> Clone for Enricher<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            pools: self.pools.clone(),
            rules: Arc::clone(&self.rules),
        }
    }
}

impl<S: PageSource> Enricher<S> {
    pub fn new(
        source: Arc<S>,
        pools: Pools,
        settings: &EnrichmentSettings,
    ) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::Invalid(format!("pattern {pattern}: {e}")))
        };
        let rules = Rules {
            placeholder: compile(&settings.placeholder_pattern)?,
            valid_image: compile(&settings.valid_image_pattern)?,
            generic_selectors: settings.generic_content_selectors.clone(),
            min_description_chars: settings.min_description_chars,
            image_attempt_cap: settings.image_attempt_cap.max(1),
            image_retry_delay: Duration::from_millis(settings.image_retry_delay_ms),
            unexpected_image_retries: settings.unexpected_image_retries,
        };
        Ok(Self {
            source,
            pools,
            rules: Arc::new(rules),
        })
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Resolve image and description concurrently and merge them.
    ///
    /// Returns `None` only if the merge step itself timed out; field-level
    /// failures already collapsed to empty strings.
    #[instrument(level = "info", skip_all, fields(url = %item.link, %category))]
    pub async fn enrich(
        &self,
        item: FeedItem,
        category: String,
        profile: &SourceProfile,
    ) -> Option<EnrichedItem> {
        let image_task = {
            let this = self.clone();
            let link = item.link.clone();
            let enclosure = item.enclosure_url.clone();
            self.pools.io.spawn("resolve image", async move {
                this.resolve_image(&link, enclosure.as_deref()).await
            })
        };
        let description_task = {
            let this = self.clone();
            let link = item.link.clone();
            let feed_text = item.description.clone();
            let selector = profile.content_selector.clone();
            self.pools.io.spawn("resolve description", async move {
                this.resolve_description(&link, &feed_text, selector.as_deref())
                    .await
            })
        };

        let (image, description) = tokio::join!(image_task, description_task);
        let image = settle(image, "image", &item.link);
        let description = settle(description, "description", &item.link);

        let source = profile.name.clone();
        self.pools
            .cpu
            .run("merge enrichment", async move {
                EnrichedItem::new(item.title, item.link, source, image, description, category)
            })
            .await
    }

    /// Pick the item image, avoiding the source's generic placeholder.
    ///
    /// The article page is re-fetched after `image_retry_delay` while it
    /// serves the placeholder, at most `image_attempt_cap` times in total.
    /// An image matching neither the placeholder nor the expected article
    /// image shape earns `unexpected_image_retries` extra tries before it is
    /// accepted as-is.
    pub async fn resolve_image(&self, article_url: &str, enclosure: Option<&str>) -> String {
        if let Some(url) = enclosure.map(str::trim).filter(|u| !u.is_empty()) {
            if !self.rules.placeholder.is_match(url) {
                return url.to_string();
            }
            debug!(%article_url, "Feed enclosure is a placeholder; checking article page");
        }

        let rules = &self.rules;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let page = match self.source.fetch_page(article_url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(%article_url, error = %e, "Article fetch failed; no image");
                    return String::new();
                }
            };
            let Some(image) = extract_meta_image(&page, article_url) else {
                debug!(%article_url, "Article has no og:image");
                return String::new();
            };

            let placeholder = rules.placeholder.is_match(&image);
            if !placeholder && rules.valid_image.is_match(&image) {
                debug!(%article_url, attempt, %image, "Resolved article image");
                return image;
            }
            if attempt >= rules.image_attempt_cap {
                if placeholder {
                    warn!(%article_url, attempts = attempt, "Only placeholder images found");
                    return String::new();
                }
                return image;
            }
            if !placeholder && attempt > rules.unexpected_image_retries {
                debug!(%article_url, %image, "Accepting image of unexpected shape");
                return image;
            }

            debug!(%article_url, attempt, placeholder, %image, "Image not ready; retrying");
            sleep(rules.image_retry_delay).await;
        }
    }

    /// Use the feed description if it is long enough, otherwise scrape the
    /// article body.
    pub async fn resolve_description(
        &self,
        article_url: &str,
        feed_description: &str,
        content_selector: Option<&str>,
    ) -> String {
        let feed_description = feed_description.trim();
        if feed_description.chars().count() >= self.rules.min_description_chars {
            return feed_description.to_string();
        }

        match self.source.fetch_page(article_url).await {
            Ok(page) => {
                let text =
                    extract_description(&page, content_selector, &self.rules.generic_selectors);
                if text.is_empty() {
                    debug!(%article_url, "No description found on article page");
                } else {
                    debug!(
                        %article_url,
                        preview = %truncate_for_log(&text, 120),
                        "Extracted description"
                    );
                }
                text
            }
            Err(e) => {
                warn!(%article_url, error = %e, "Article fetch failed; no description");
                String::new()
            }
        }
    }
}

fn settle(joined: Result<Option<String>, JoinError>, field: &str, url: &str) -> String {
    match joined {
        Ok(Some(value)) => value,
        Ok(None) => {
            warn!(%url, field, "Resolution timed out; leaving field empty");
            String::new()
        }
        Err(e) => {
            error!(%url, field, error = %e, "Resolution task failed; leaving field empty");
            String::new()
        }
    }
}

/// `og:image` of an HTML page, resolved against `page_url`.
pub fn extract_meta_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let raw = document
        .select(&META_IMAGE)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())?;

    match Url::parse(page_url).and_then(|base| base.join(raw)) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(_) => Some(raw.to_string()),
    }
}

/// Article text from the first selector that yields any paragraph text,
/// falling back to the meta description. Paragraphs are separated by a
/// blank line.
pub fn extract_description(
    html: &str,
    content_selector: Option<&str>,
    generic_selectors: &[String],
) -> String {
    let document = Html::parse_document(html);
    content_selector
        .into_iter()
        .chain(generic_selectors.iter().map(String::as_str))
        .find_map(|selector| paragraphs(&document, selector))
        .or_else(|| meta_description(&document))
        .unwrap_or_default()
}

fn paragraphs(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let text = document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (!text.is_empty()).then_some(text)
}

fn meta_description(document: &Html) -> Option<String> {
    document
        .select(&META_DESCRIPTION)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolsSettings;
    use crate::testing::{Reply, ScriptedSource, long_text, page_with_image};
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    const ARTICLE: &str = "https://lenta.ru/news/2025/05/06/one/";
    const PLACEHOLDER: &str = "https://lenta.ru/assets/webpack/images/lenta_og.2f3a9c.png";
    const VALID: &str = "https://icdn.lenta.ru/images/2025/05/06/10/photo.jpg";
    const ODD: &str = "https://cdn.example.com/pictures/photo.png";

    fn enricher(source: ScriptedSource) -> (Enricher<ScriptedSource>, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let pools = Pools::from_settings(&PoolsSettings::default()).unwrap();
        let enricher =
            Enricher::new(Arc::clone(&source), pools, &EnrichmentSettings::default()).unwrap();
        (enricher, source)
    }

    fn body(html: String) -> Reply {
        Reply::Body(html)
    }

    #[tokio::test]
    async fn non_placeholder_enclosure_is_used_without_fetching() {
        let (e, source) = enricher(ScriptedSource::new());
        assert_eq!(e.resolve_image(ARTICLE, Some(VALID)).await, VALID);
        assert_eq!(source.calls(ARTICLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholders_are_retried_until_a_valid_image_appears() {
        let (e, source) = enricher(ScriptedSource::new().with(
            ARTICLE,
            vec![
                body(page_with_image(PLACEHOLDER)),
                body(page_with_image(PLACEHOLDER)),
                body(page_with_image(VALID)),
            ],
        ));
        let start = Instant::now();
        let image = e.resolve_image(ARTICLE, Some(PLACEHOLDER)).await;
        assert_eq!(image, VALID);
        assert_eq!(source.calls(ARTICLE), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(2 * 5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_until_cap_gives_empty() {
        let (e, source) = enricher(
            ScriptedSource::new().with(ARTICLE, vec![body(page_with_image(PLACEHOLDER))]),
        );
        assert_eq!(e.resolve_image(ARTICLE, None).await, "");
        assert_eq!(source.calls(ARTICLE), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_image_shape_gets_two_extra_attempts() {
        let (e, source) =
            enricher(ScriptedSource::new().with(ARTICLE, vec![body(page_with_image(ODD))]));
        assert_eq!(e.resolve_image(ARTICLE, None).await, ODD);
        assert_eq!(source.calls(ARTICLE), 3);
    }

    #[tokio::test]
    async fn image_fetch_failure_degrades_to_empty() {
        let (e, _) = enricher(ScriptedSource::new().with(ARTICLE, vec![Reply::Timeout]));
        assert_eq!(e.resolve_image(ARTICLE, None).await, "");
    }

    #[tokio::test]
    async fn long_feed_description_is_kept() {
        let (e, source) = enricher(ScriptedSource::new());
        let text = long_text("lead");
        assert_eq!(e.resolve_description(ARTICLE, &text, None).await, text.trim());
        assert_eq!(source.calls(ARTICLE), 0);
    }

    #[tokio::test]
    async fn short_feed_description_is_replaced_from_article() {
        let page = r#"<html><body><div class="topic-body__content">
            <p>First paragraph.</p><p>  </p><p>Second <b>paragraph</b>.</p>
        </div><article><p>Generic text.</p></article></body></html>"#;
        let (e, _) = enricher(ScriptedSource::new().body(ARTICLE, page));
        let text = e
            .resolve_description(ARTICLE, "Short.", Some(".topic-body__content p"))
            .await;
        assert_eq!(text, "First paragraph.\n\nSecond paragraph.");
    }

    #[tokio::test]
    async fn description_fetch_failure_degrades_to_empty() {
        let (e, _) = enricher(ScriptedSource::new().with(ARTICLE, vec![Reply::Status(500)]));
        assert_eq!(e.resolve_description(ARTICLE, "", None).await, "");
    }

    #[test]
    fn generic_selectors_then_meta_description() {
        let generic: Vec<String> = EnrichmentSettings::default().generic_content_selectors;
        let article = "<html><body><div class=\"entry-content\"><p>Entry.</p></div></body></html>";
        assert_eq!(extract_description(article, Some(".missing p"), &generic), "Entry.");

        let meta = r#"<html><head><meta name="description" content=" From meta "></head></html>"#;
        assert_eq!(extract_description(meta, None, &generic), "From meta");

        assert_eq!(extract_description("<html></html>", None, &generic), "");
    }

    #[test]
    fn relative_meta_image_is_resolved() {
        let html = page_with_image("/images/2025/05/06/10/a.jpg");
        assert_eq!(
            extract_meta_image(&html, ARTICLE).as_deref(),
            Some("https://lenta.ru/images/2025/05/06/10/a.jpg")
        );
        assert_eq!(extract_meta_image("<html></html>", ARTICLE), None);
    }

    #[tokio::test]
    async fn enrich_merges_both_resolutions() {
        let page = format!(
            r#"<html><head><meta property="og:image" content="{VALID}"></head>
            <body><article><p>Full story.</p></article></body></html>"#
        );
        let (e, _) = enricher(ScriptedSource::new().body(ARTICLE, page));
        let item = FeedItem {
            title: "Headline".into(),
            link: ARTICLE.into(),
            category: "Мир".into(),
            description: "Lead.".into(),
            enclosure_url: Some(PLACEHOLDER.into()),
        };
        let profile = SourceProfile {
            name: "Lenta.ru".into(),
            content_selector: None,
        };

        let enriched = e.enrich(item, "world".into(), &profile).await.unwrap();
        assert_eq!(enriched.title(), "Headline");
        assert_eq!(enriched.url(), ARTICLE);
        assert_eq!(enriched.source(), "Lenta.ru");
        assert_eq!(enriched.image_url(), VALID);
        assert_eq!(enriched.description(), "Full story.");
        assert_eq!(enriched.category(), "world");
    }
}
