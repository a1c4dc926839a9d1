//! RSS feed parsing.
//!
//! Only the fields the relay consumes are read from each `<item>`: title,
//! link, description, the first category label and the enclosure URL.
//! Items come back in document order, which feed providers are expected to
//! keep most-recent-first.

use crate::error::FeedError;
use crate::models::FeedItem;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Description,
    Category,
    Other,
}

impl Field {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"title" => Field::Title,
            b"link" => Field::Link,
            b"description" => Field::Description,
            b"category" => Field::Category,
            _ => Field::Other,
        }
    }
}

/// Parse an RSS document into its items.
///
/// Items without a `<link>` are dropped since the link is the dedup key.
///
/// # Errors
///
/// A structural XML error stops parsing. Items completed before the error
/// are kept and returned; the partial item and everything after it are
/// lost. [`FeedError::Xml`] is returned only when the error leaves no
/// complete item at all.
pub fn parse_items(xml: &str) -> Result<Vec<FeedItem>, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<FeedItem> = None;
    let mut field = Field::Other;
    let mut depth_in_field = 0usize;
    let mut category_seen = false;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(source) => {
                let position = reader.buffer_position() as u64;
                if items.is_empty() {
                    return Err(FeedError::Xml { position, source });
                }
                warn!(
                    position,
                    error = %source,
                    kept = items.len(),
                    "Malformed feed XML; keeping items parsed so far"
                );
                break;
            }
        };
        match event {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"item" {
                    current = Some(FeedItem::default());
                    category_seen = false;
                    field = Field::Other;
                    depth_in_field = 0;
                } else if let Some(item) = current.as_mut() {
                    if field == Field::Other && e.local_name().as_ref() == b"enclosure" {
                        if item.enclosure_url.is_none() {
                            item.enclosure_url = enclosure_url(&e);
                        }
                    } else if field == Field::Other {
                        // Prefixed names such as media:title are not item fields.
                        field = Field::from_name(e.name().as_ref());
                        depth_in_field = 0;
                    } else {
                        // Markup nested inside a field, e.g. <b> in a description.
                        depth_in_field += 1;
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(item) = current.as_mut() {
                    if e.local_name().as_ref() == b"enclosure" && item.enclosure_url.is_none() {
                        item.enclosure_url = enclosure_url(&e);
                    }
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        if !item.link.is_empty() {
                            items.push(item);
                        }
                    }
                    field = Field::Other;
                } else if depth_in_field > 0 {
                    depth_in_field -= 1;
                } else {
                    if field == Field::Category {
                        category_seen = true;
                    }
                    field = Field::Other;
                }
            }
            Event::Text(t) => {
                if let Some(item) = current.as_mut() {
                    let text = t.unescape().unwrap_or_default();
                    append_field(item, field, &text, category_seen);
                }
            }
            Event::CData(c) => {
                if let Some(item) = current.as_mut() {
                    let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                    append_field(item, field, &text, category_seen);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

fn append_field(item: &mut FeedItem, field: Field, text: &str, category_seen: bool) {
    let target = match field {
        Field::Title => &mut item.title,
        Field::Link => &mut item.link,
        Field::Description => &mut item.description,
        // Only the first category label counts.
        Field::Category if !category_seen => &mut item.category,
        _ => return,
    };
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

fn enclosure_url(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"url")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
