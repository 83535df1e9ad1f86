//! Retrieval index: chunk embeddings with nearest-neighbour queries.
//!
//! Chunks are kept in memory keyed by path and persisted as JSON lines
//! (one `FileChunk` per line) at `.llmcode/index.jsonl`. Replacing a
//! path's chunks happens under a single write lock, so readers see either
//! the old set or the new one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use llmcode_core::provider::MAX_EMBED_BATCH;
use llmcode_core::{
    DomainEvent, EmbeddingRequest, EventBus, FileChunk, Provider, StoreError, content_hash,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::chunker::chunk_text;
use crate::persist::write_atomic;
use crate::vector::cosine_similarity;

/// File name of the persisted index inside the project state directory.
pub const INDEX_FILE: &str = "index.jsonl";

/// A chunk returned by a query, with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: FileChunk,
    pub score: f32,
    /// Modification time of the source file at query time
    pub modified: Option<SystemTime>,
}

/// What `index_file` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Stored hash matched the live file; nothing re-embedded
    Unchanged,
    /// Re-chunked and re-embedded into this many chunks
    Indexed(usize),
    /// The file is gone; its chunks were dropped
    Removed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
}

/// Embedding settings used while indexing.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub model: Option<String>,
    pub batch_size: usize,
    pub chunk_max_tokens: usize,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            model: None,
            batch_size: 20,
            chunk_max_tokens: 500,
        }
    }
}

pub struct RetrievalIndex {
    root: PathBuf,
    file: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Vec<FileChunk>>>,
}

impl RetrievalIndex {
    /// Open the index persisted under `state_dir`, or start empty.
    pub fn open(root: impl Into<PathBuf>, state_dir: &Path) -> Self {
        let file = state_dir.join(INDEX_FILE);
        let entries = load_from_disk(&file);
        debug!(path = %file.display(), files = entries.len(), "Retrieval index loaded");
        Self {
            root: root.into(),
            file: Some(file),
            entries: RwLock::new(entries),
        }
    }

    /// An index that never touches disk.
    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace every chunk stored for `path`. An empty list removes it.
    pub async fn upsert(&self, path: &str, chunks: Vec<FileChunk>) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.write().await;
            if chunks.is_empty() {
                entries.remove(path);
            } else {
                entries.insert(path.to_string(), chunks);
            }
        }
        self.flush().await
    }

    pub async fn remove(&self, path: &str) -> Result<bool, StoreError> {
        let removed = self.entries.write().await.remove(path).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    /// Hash recorded for `path` at its last upsert.
    pub async fn stored_hash(&self, path: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(path)
            .and_then(|chunks| chunks.first())
            .map(|c| c.content_hash.clone())
    }

    pub async fn chunks_for(&self, path: &str) -> Vec<FileChunk> {
        self.entries.read().await.get(path).cloned().unwrap_or_default()
    }

    /// Top-`k` chunks by cosine similarity to `embedding`.
    ///
    /// Ordering: score descending, then most recently modified source
    /// file, then path, then position in the file. Chunks whose source
    /// file is gone or no longer matches the stored content hash are
    /// skipped; each candidate file is checked once per query.
    pub async fn query(&self, embedding: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<ScoredChunk> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .flatten()
                .filter(|chunk| !chunk.embedding.is_empty())
                .map(|chunk| ScoredChunk {
                    score: cosine_similarity(&chunk.embedding, embedding),
                    chunk: chunk.clone(),
                    modified: None,
                })
                .collect()
        };
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        // Walk in score order until k fresh chunks are found and the next
        // score is strictly lower, so ties still rank by mtime.
        let mut live: HashMap<String, Option<Option<SystemTime>>> = HashMap::new();
        let mut scored = Vec::new();
        for mut candidate in candidates {
            if scored.len() >= k
                && scored
                    .last()
                    .is_some_and(|last: &ScoredChunk| candidate.score < last.score)
            {
                break;
            }
            let path = candidate.chunk.path.clone();
            let state = match live.get(&path) {
                Some(state) => *state,
                None => {
                    let state = self.live_state(&path, &candidate.chunk.content_hash).await;
                    live.insert(path, state);
                    state
                }
            };
            if let Some(modified) = state {
                candidate.modified = modified;
                scored.push(candidate);
            }
        }

        scored.sort_by(rank_order);
        scored.truncate(k);
        scored
    }

    /// `Some(mtime)` when the file at `path` still hashes to `hash`,
    /// `None` when it is gone or has changed since indexing.
    async fn live_state(&self, path: &str, hash: &str) -> Option<Option<SystemTime>> {
        let full = self.root.join(path);
        let bytes = tokio::fs::read(&full).await.ok()?;
        if content_hash(&bytes) != hash {
            debug!(path, "Skipping stale chunks");
            return None;
        }
        let modified = tokio::fs::metadata(&full)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        Some(modified)
    }

    /// Embed `text` with `provider` and query.
    pub async fn query_text(
        &self,
        provider: &dyn Provider,
        model: Option<String>,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let response = provider
            .embed(EmbeddingRequest {
                texts: vec![text.to_string()],
                model,
            })
            .await
            .map_err(|e| StoreError::EmbeddingFailed(e.to_string()))?;
        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::EmbeddingFailed("empty embedding response".into()))?;
        Ok(self.query(&embedding, k).await)
    }

    /// Re-chunk and re-embed `path` if its content hash changed.
    pub async fn index_file(
        &self,
        path: &str,
        provider: &dyn Provider,
        options: &EmbedOptions,
        events: Option<&EventBus>,
    ) -> Result<IndexOutcome, StoreError> {
        let bytes = match tokio::fs::read(self.root.join(path)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.remove(path).await?;
                return Ok(IndexOutcome::Removed);
            }
            Err(e) => return Err(StoreError::Storage(format!("read {path}: {e}"))),
        };

        let live_hash = content_hash(&bytes);
        if self.stored_hash(path).await.as_deref() == Some(live_hash.as_str()) {
            debug!(path, "Index entry up to date");
            return Ok(IndexOutcome::Unchanged);
        }

        let text = String::from_utf8_lossy(&bytes);
        let mut chunks = chunk_text(path, &text, options.chunk_max_tokens);
        embed_chunks(&mut chunks, provider, options).await?;
        let count = chunks.len();
        self.upsert(path, chunks).await?;

        info!(path, chunks = count, "Indexed file");
        if let Some(bus) = events {
            bus.publish(DomainEvent::FileIndexed {
                path: path.to_string(),
                chunks: count,
                timestamp: Utc::now(),
            });
        }
        Ok(IndexOutcome::Indexed(count))
    }

    /// Drop entries whose source file no longer exists. Returns how many
    /// paths were removed.
    pub async fn prune(&self) -> Result<usize, StoreError> {
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|path, _| self.root.join(path).exists());
            before - entries.len()
        };
        if removed > 0 {
            self.flush().await?;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> IndexStats {
        let entries = self.entries.read().await;
        IndexStats {
            files: entries.len(),
            chunks: entries.values().map(Vec::len).sum(),
        }
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        self.flush().await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let mut content = String::new();
        {
            let entries = self.entries.read().await;
            for chunk in entries.values().flatten() {
                let line = serde_json::to_string(chunk)
                    .map_err(|e| StoreError::Storage(format!("serialize chunk: {e}")))?;
                content.push_str(&line);
                content.push('\n');
            }
        }

        write_atomic(file, content.as_bytes()).await
    }
}

/// Embed chunk contents in batches, filling `embedding` in place.
async fn embed_chunks(
    chunks: &mut [FileChunk],
    provider: &dyn Provider,
    options: &EmbedOptions,
) -> Result<(), StoreError> {
    let batch_size = options.batch_size.clamp(1, MAX_EMBED_BATCH);
    for batch in chunks.chunks_mut(batch_size) {
        let texts = batch.iter().map(|c| c.content.clone()).collect::<Vec<_>>();
        let response = provider
            .embed(EmbeddingRequest {
                texts,
                model: options.model.clone(),
            })
            .await
            .map_err(|e| StoreError::EmbeddingFailed(e.to_string()))?;

        if response.embeddings.len() != batch.len() {
            return Err(StoreError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                response.embeddings.len()
            )));
        }
        for (chunk, embedding) in batch.iter_mut().zip(response.embeddings) {
            chunk.embedding = embedding;
        }
    }
    Ok(())
}

fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.modified.cmp(&a.modified))
        .then_with(|| a.chunk.path.cmp(&b.chunk.path))
        .then_with(|| a.chunk.byte_range.start.cmp(&b.chunk.byte_range.start))
}

fn load_from_disk(path: &Path) -> BTreeMap<String, Vec<FileChunk>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return BTreeMap::new(),
    };

    let mut entries: BTreeMap<String, Vec<FileChunk>> = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<FileChunk>(line) {
            Ok(chunk) => entries.entry(chunk.path.clone()).or_default().push(chunk),
            Err(e) => warn!(error = %e, "Skipping corrupted index entry"),
        }
    }
    // A path whose chunks disagree on the hash was half-written; drop it
    // so the next scan re-embeds it.
    entries.retain(|path, chunks| {
        let consistent = chunks.windows(2).all(|w| w[0].content_hash == w[1].content_hash);
        if !consistent {
            warn!(path, "Dropping inconsistent index entry");
        }
        consistent
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::KeywordEmbedder;
    use llmcode_core::ByteRange;

    /// Body `project` writes for `path`.
    fn body(path: &str) -> String {
        format!("// {path}\n")
    }

    fn chunk(path: &str, embedding: Vec<f32>) -> FileChunk {
        FileChunk {
            path: path.into(),
            byte_range: ByteRange::new(0, 10),
            content_hash: content_hash(body(path).as_bytes()),
            content: format!("content of {path}"),
            embedding,
        }
    }

    fn project(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), body(f)).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn parse_config_query_prefers_config_py() {
        let dir = project(&["config.py", "parser.py"]);
        let index = RetrievalIndex::in_memory(dir.path());
        // Query vector is [1, 0]; these embeddings score 0.91 and 0.86.
        let config_vec = vec![0.91, (1.0f32 - 0.91 * 0.91).sqrt()];
        let parser_vec = vec![0.86, (1.0f32 - 0.86 * 0.86).sqrt()];
        index.upsert("config.py", vec![chunk("config.py", config_vec)]).await.unwrap();
        index.upsert("parser.py", vec![chunk("parser.py", parser_vec)]).await.unwrap();

        let results = index.query(&[1.0, 0.0], 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.path, "config.py");
        assert!((results[0].score - 0.91).abs() < 1e-4);
    }

    #[tokio::test]
    async fn upsert_replaces_previous_chunks() {
        let dir = project(&["a.py"]);
        let index = RetrievalIndex::in_memory(dir.path());
        index
            .upsert("a.py", vec![chunk("a.py", vec![1.0]), chunk("a.py", vec![1.0])])
            .await
            .unwrap();
        index.upsert("a.py", vec![chunk("a.py", vec![1.0])]).await.unwrap();
        assert_eq!(index.stats().await, IndexStats { files: 1, chunks: 1 });
    }

    #[tokio::test]
    async fn deleted_files_never_returned() {
        let dir = project(&["a.py", "b.py"]);
        let index = RetrievalIndex::in_memory(dir.path());
        index.upsert("a.py", vec![chunk("a.py", vec![1.0, 0.0])]).await.unwrap();
        index.upsert("b.py", vec![chunk("b.py", vec![0.9, 0.1])]).await.unwrap();
        std::fs::remove_file(dir.path().join("a.py")).unwrap();

        let results = index.query(&[1.0, 0.0], 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.path, "b.py");

        assert_eq!(index.prune().await.unwrap(), 1);
        assert_eq!(index.stats().await.files, 1);
    }

    #[tokio::test]
    async fn edited_files_do_not_serve_old_chunks() {
        let dir = project(&[]);
        std::fs::write(dir.path().join("a.py"), "def parse_config():\n    pass\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def parse_args():\n    pass\n").unwrap();
        let index = RetrievalIndex::in_memory(dir.path());
        let embedder = KeywordEmbedder::default();
        let opts = EmbedOptions::default();
        index.index_file("a.py", &embedder, &opts, None).await.unwrap();
        index.index_file("b.py", &embedder, &opts, None).await.unwrap();

        std::fs::write(dir.path().join("a.py"), "def load_settings():\n    pass\n").unwrap();

        let results = index.query_text(&embedder, None, "parse config", 5).await.unwrap();
        assert!(results.iter().all(|r| r.chunk.path != "a.py"));
        assert!(results.iter().any(|r| r.chunk.path == "b.py"));

        // Re-indexing brings the file back with its new content.
        index.index_file("a.py", &embedder, &opts, None).await.unwrap();
        let results = index.query_text(&embedder, None, "load settings", 5).await.unwrap();
        let a = results.iter().find(|r| r.chunk.path == "a.py").unwrap();
        assert!(a.chunk.content.contains("load_settings"));
    }

    #[tokio::test]
    async fn ties_break_by_path_when_mtimes_match() {
        let dir = project(&["b.py", "a.py"]);
        let index = RetrievalIndex::in_memory(dir.path());
        let same = std::fs::metadata(dir.path().join("a.py")).unwrap().modified().unwrap();
        let file = std::fs::File::options().write(true).open(dir.path().join("b.py")).unwrap();
        file.set_modified(same).unwrap();

        index.upsert("b.py", vec![chunk("b.py", vec![1.0])]).await.unwrap();
        index.upsert("a.py", vec![chunk("a.py", vec![1.0])]).await.unwrap();

        let results = index.query(&[1.0], 2).await;
        let paths: Vec<_> = results.iter().map(|r| r.chunk.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
    }

    #[tokio::test]
    async fn index_file_skips_unchanged_content() {
        let dir = project(&[]);
        std::fs::write(dir.path().join("config.py"), "def parse_config():\n    pass\n").unwrap();
        let index = RetrievalIndex::in_memory(dir.path());
        let embedder = KeywordEmbedder::default();
        let opts = EmbedOptions::default();

        let first = index.index_file("config.py", &embedder, &opts, None).await.unwrap();
        assert_eq!(first, IndexOutcome::Indexed(1));
        let second = index.index_file("config.py", &embedder, &opts, None).await.unwrap();
        assert_eq!(second, IndexOutcome::Unchanged);
        assert_eq!(embedder.calls(), 1);

        std::fs::write(dir.path().join("config.py"), "def parse_config(path):\n    pass\n").unwrap();
        let third = index.index_file("config.py", &embedder, &opts, None).await.unwrap();
        assert_eq!(third, IndexOutcome::Indexed(1));
        assert_eq!(embedder.calls(), 2);

        std::fs::remove_file(dir.path().join("config.py")).unwrap();
        let fourth = index.index_file("config.py", &embedder, &opts, None).await.unwrap();
        assert_eq!(fourth, IndexOutcome::Removed);
        assert_eq!(index.stats().await.files, 0);
    }

    #[tokio::test]
    async fn embedding_batches_respect_batch_size() {
        let dir = project(&[]);
        let body: String = (0..40).map(|i| format!("line {i} with some words\n")).collect();
        std::fs::write(dir.path().join("big.py"), body).unwrap();
        let index = RetrievalIndex::in_memory(dir.path());
        let embedder = KeywordEmbedder::default();
        let opts = EmbedOptions {
            batch_size: 3,
            chunk_max_tokens: 10,
            ..EmbedOptions::default()
        };

        let IndexOutcome::Indexed(n) = index.index_file("big.py", &embedder, &opts, None).await.unwrap()
        else {
            panic!("expected Indexed");
        };
        assert!(n > 3);
        assert_eq!(embedder.calls(), n.div_ceil(3));
        assert!(embedder.max_batch() <= 3);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = project(&["a.py"]);
        let state = dir.path().join(".llmcode");
        {
            let index = RetrievalIndex::open(dir.path(), &state);
            index.upsert("a.py", vec![chunk("a.py", vec![0.5, 0.5])]).await.unwrap();
        }
        let reopened = RetrievalIndex::open(dir.path(), &state);
        assert_eq!(reopened.stats().await, IndexStats { files: 1, chunks: 1 });
        assert_eq!(
            reopened.stored_hash("a.py").await,
            Some(content_hash(body("a.py").as_bytes()))
        );
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let dir = project(&["a.py"]);
        let state = dir.path().join(".llmcode");
        std::fs::create_dir_all(&state).unwrap();
        let good = serde_json::to_string(&chunk("a.py", vec![1.0])).unwrap();
        std::fs::write(state.join(INDEX_FILE), format!("{good}\nnot json\n")).unwrap();

        let index = RetrievalIndex::open(dir.path(), &state);
        assert_eq!(index.stats().await.chunks, 1);
    }
}
