//! Summarization store: one cached summary per file, keyed by content hash.
//!
//! A lookup hashes the live file; a cached entry with the same hash is
//! served without any network call, anything else is regenerated through
//! the provider and persisted before it is returned. Stale text is never
//! handed out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use llmcode_core::{
    DomainEvent, EventBus, FileSummary, Provider, StoreError, SummaryRequest, content_hash,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::persist::write_atomic;
use crate::scanner::language_for;

pub const SUMMARY_FILE: &str = "summaries.json";

/// Model settings for summary generation.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub model: String,
    /// Token cap for one summary
    pub max_length: u32,
}

impl SummaryOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_length: 300,
        }
    }
}

pub struct SummaryStore {
    root: PathBuf,
    file: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, FileSummary>>,
}

impl SummaryStore {
    /// Open the store persisted under `state_dir`, or start empty.
    pub fn open(root: impl Into<PathBuf>, state_dir: &Path) -> Self {
        let file = state_dir.join(SUMMARY_FILE);
        let entries = match std::fs::read_to_string(&file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %file.display(), error = %e, "Summary cache unreadable, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %file.display(), count = entries.len(), "Summary store loaded");
        Self {
            root: root.into(),
            file: Some(file),
            entries: RwLock::new(entries),
        }
    }

    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Summary for `path`, regenerated if missing or stale.
    pub async fn get_summary(
        &self,
        path: &str,
        summarizer: &dyn Provider,
        options: &SummaryOptions,
        events: Option<&EventBus>,
    ) -> Result<FileSummary, StoreError> {
        let content = tokio::fs::read_to_string(self.root.join(path))
            .await
            .map_err(|e| StoreError::Storage(format!("read {path}: {e}")))?;
        let live_hash = content_hash(content.as_bytes());

        if let Some(cached) = self.entries.read().await.get(path)
            && cached.is_fresh(&live_hash)
        {
            debug!(path, "Summary cache hit");
            return Ok(cached.clone());
        }

        let text = summarizer
            .summarize(SummaryRequest {
                path: path.to_string(),
                content,
                language: language_for(Path::new(path)).to_string(),
                model: options.model.clone(),
                max_length: options.max_length,
            })
            .await
            .map_err(|e| StoreError::SummaryFailed(e.to_string()))?;

        let summary = FileSummary {
            path: path.to_string(),
            content_hash: live_hash,
            text,
            generated_at: Utc::now(),
        };
        self.entries
            .write()
            .await
            .insert(path.to_string(), summary.clone());
        self.flush().await?;

        info!(path, "Summary regenerated");
        if let Some(bus) = events {
            bus.publish(DomainEvent::SummaryGenerated {
                path: path.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(summary)
    }

    /// Cached summary for `path` only if it matches the live file.
    pub async fn fresh(&self, path: &str) -> Option<FileSummary> {
        let bytes = tokio::fs::read(self.root.join(path)).await.ok()?;
        let live_hash = content_hash(&bytes);
        self.entries
            .read()
            .await
            .get(path)
            .filter(|s| s.is_fresh(&live_hash))
            .cloned()
    }

    /// Whether `path` would be regenerated by the next `get_summary`.
    pub async fn needs_update(&self, path: &str, live_hash: &str) -> bool {
        self.entries
            .read()
            .await
            .get(path)
            .is_none_or(|s| !s.is_fresh(live_hash))
    }

    pub async fn all(&self) -> Vec<FileSummary> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, path: &str) -> Result<bool, StoreError> {
        let removed = self.entries.write().await.remove(path).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        self.flush().await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let body = {
            let entries = self.entries.read().await;
            serde_json::to_vec_pretty(&*entries)
                .map_err(|e| StoreError::Storage(format!("serialize summaries: {e}")))?
        };
        write_atomic(file, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::KeywordEmbedder;

    fn setup() -> (tempfile::TempDir, SummaryOptions) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    return 1\n").unwrap();
        (dir, SummaryOptions::new("test-model"))
    }

    #[tokio::test]
    async fn second_lookup_is_cached() {
        let (dir, opts) = setup();
        let store = SummaryStore::in_memory(dir.path());
        let provider = KeywordEmbedder::default();

        let first = store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        let second = store.get_summary("a.py", &provider, &opts, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.summaries(), 1);
    }

    #[tokio::test]
    async fn content_change_regenerates() {
        let (dir, opts) = setup();
        let store = SummaryStore::in_memory(dir.path());
        let provider = KeywordEmbedder::default();

        let first = store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    return 2\n").unwrap();
        assert!(store.fresh("a.py").await.is_none());

        let second = store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        assert_ne!(first.content_hash, second.content_hash);
        assert_ne!(first.text, second.text);
        assert_eq!(provider.summaries(), 2);
        assert_eq!(store.fresh("a.py").await, Some(second));
    }

    #[tokio::test]
    async fn needs_update_tracks_hash() {
        let (dir, opts) = setup();
        let store = SummaryStore::in_memory(dir.path());
        let provider = KeywordEmbedder::default();
        let hash = content_hash(&std::fs::read(dir.path().join("a.py")).unwrap());

        assert!(store.needs_update("a.py", &hash).await);
        store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        assert!(!store.needs_update("a.py", &hash).await);
        assert!(store.needs_update("a.py", "other").await);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let (dir, opts) = setup();
        let state = dir.path().join(".llmcode");
        let provider = KeywordEmbedder::default();
        {
            let store = SummaryStore::open(dir.path(), &state);
            store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        }
        let store = SummaryStore::open(dir.path(), &state);
        assert_eq!(store.len().await, 1);
        store.get_summary("a.py", &provider, &opts, None).await.unwrap();
        assert_eq!(provider.summaries(), 1);

        store.clear().await.unwrap();
        assert!(SummaryStore::open(dir.path(), &state).is_empty().await);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let (dir, opts) = setup();
        let store = SummaryStore::in_memory(dir.path());
        let provider = KeywordEmbedder::default();
        let err = store.get_summary("nope.py", &provider, &opts, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
