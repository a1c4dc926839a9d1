//! Delivered-URL ledger.
//!
//! The durable form is a plain text file with one URL per line, appended to
//! after every confirmed delivery and read once at startup. The in-memory
//! set is the only thing consulted during a cycle.
//!
//! Only one cycle runs at a time, so the window between a `contains` miss
//! and the matching `record` is not guarded further.

use crate::error::LedgerError;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Set of URLs that have already been delivered.
pub trait DedupLedger: Send + Sync + 'static {
    fn contains(&self, url: &str) -> bool;

    /// Remember `url` as delivered. Call only after a confirmed delivery.
    fn record(&self, url: &str) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ledger backed by an append-only, line-delimited file.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    delivered: RwLock<HashSet<String>>,
    /// Held while appending. `true` while the file's last line is unterminated.
    writer: Mutex<bool>,
}

impl FileLedger {
    /// Read the whole log into memory. A missing file is an empty ledger.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let (delivered, unterminated): (HashSet<String>, bool) =
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => (
                    text.lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(String::from)
                        .collect(),
                    !text.is_empty() && !text.ends_with('\n'),
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!("No ledger file yet; starting empty");
                    (HashSet::new(), false)
                }
                Err(source) => {
                    return Err(LedgerError::Io {
                        path: path.display().to_string(),
                        source,
                    });
                }
            };
        info!(count = delivered.len(), "Loaded delivered URLs");
        Ok(Self {
            path,
            delivered: RwLock::new(delivered),
            writer: Mutex::new(unterminated),
        })
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl DedupLedger for FileLedger {
    fn contains(&self, url: &str) -> bool {
        self.delivered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    fn record(&self, url: &str) -> impl Future<Output = Result<(), LedgerError>> + Send {
        let url = url.trim().to_string();
        async move {
            let mut unterminated = self.writer.lock().await;
            if self.contains(&url) {
                debug!(%url, "Already in ledger");
                return Ok(());
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| self.io_error(e))?;
            let line = if *unterminated {
                format!("\n{url}\n")
            } else {
                format!("{url}\n")
            };
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;
            file.flush().await.map_err(|e| self.io_error(e))?;
            *unterminated = false;

            self.delivered
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url);
            Ok(())
        }
    }

    fn len(&self) -> usize {
        self.delivered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Non-durable ledger.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryLedger {
    delivered: RwLock<HashSet<String>>,
}

#[cfg(test)]
impl MemoryLedger {
    pub fn with_urls<I, T>(urls: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            delivered: RwLock::new(urls.into_iter().map(Into::into).collect()),
        }
    }
}

#[cfg(test)]
impl DedupLedger for MemoryLedger {
    fn contains(&self, url: &str) -> bool {
        self.delivered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    fn record(&self, url: &str) -> impl Future<Output = Result<(), LedgerError>> + Send {
        self.delivered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.trim().to_string());
        std::future::ready(Ok(()))
    }

    fn len(&self) -> usize {
        self.delivered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_path(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "news_relay_{name}_{}_{n}.txt",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_ledger() {
        let path = temp_path("missing");
        let ledger = FileLedger::load(&path).await.unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("https://example.com/a"));
    }

    #[tokio::test]
    async fn record_appends_and_survives_reload() {
        let path = temp_path("reload");
        tokio::fs::write(&path, "https://example.com/old\n\n").await.unwrap();

        let ledger = FileLedger::load(&path).await.unwrap();
        assert!(ledger.contains("https://example.com/old"));
        ledger.record("https://example.com/new").await.unwrap();
        ledger.record("https://example.com/new").await.unwrap();
        assert!(ledger.contains("https://example.com/new"));
        assert_eq!(ledger.len(), 2);

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "https://example.com/old\n\nhttps://example.com/new\n");

        let reloaded = FileLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("https://example.com/new"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn append_after_unterminated_last_line() {
        let path = temp_path("unterminated");
        tokio::fs::write(&path, "https://example.com/a").await.unwrap();

        let ledger = FileLedger::load(&path).await.unwrap();
        ledger.record("https://example.com/b").await.unwrap();
        ledger.record("https://example.com/c").await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            text,
            "https://example.com/a\nhttps://example.com/b\nhttps://example.com/c\n"
        );

        let reloaded = FileLedger::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded.contains("https://example.com/a"));
        assert!(reloaded.contains("https://example.com/b"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn unreadable_ledger_is_an_error() {
        let dir = temp_path("dir");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        assert!(matches!(
            FileLedger::load(&dir).await,
            Err(LedgerError::Io { .. })
        ));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn memory_ledger_records() {
        let ledger = MemoryLedger::with_urls(["https://example.com/a"]);
        assert!(ledger.contains("https://example.com/a"));
        ledger.record("https://example.com/b").await.unwrap();
        assert_eq!(ledger.len(), 2);
    }
}
