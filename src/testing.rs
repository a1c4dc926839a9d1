//! Scripted doubles shared by the pipeline tests.

use crate::error::FetchError;
use crate::fetch::PageSource;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Timeout,
    Status(u16),
}

/// A [`PageSource`] that answers each URL from a per-URL script.
///
/// Replies are consumed in order; the last one repeats forever. Unknown
/// URLs answer 404.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
        self
    }

    pub fn body(self, url: &str, body: impl Into<String>) -> Self {
        self.with(url, vec![Reply::Body(body.into())])
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn next_reply(&self, url: &str) -> Reply {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Status(404)),
            None => Reply::Status(404),
        }
    }
}

impl PageSource for ScriptedSource {
    fn fetch_page(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        let reply = self.next_reply(url);
        let url = url.to_string();
        async move {
            match reply {
                Reply::Body(body) => Ok(body),
                Reply::Timeout => Err(FetchError::Timeout { url, timeout_ms: 0 }),
                Reply::Status(status) => Err(FetchError::Status { url, status }),
            }
        }
    }
}

/// An article page whose only interesting content is its meta image.
pub fn page_with_image(image: &str) -> String {
    format!(
        r#"<html><head><meta property="og:image" content="{image}"></head><body></body></html>"#
    )
}

/// Minimal RSS document with `(title, link, category)` items.
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link, category)| {
            format!(
                "<item><title>{title}</title><link>{link}</link>\
                 <description>{}</description><category>{category}</category>\
                 <enclosure url=\"{link}/image.jpg\" type=\"image/jpeg\"/></item>",
                long_text(title)
            )
        })
        .collect();
    format!("<rss version=\"2.0\"><channel><title>Test</title>{body}</channel></rss>")
}

/// A description long enough to skip article lookups.
pub fn long_text(seed: &str) -> String {
    format!("{seed}: {}", "lorem ipsum dolor sit amet ".repeat(5))
}
