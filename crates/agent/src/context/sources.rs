//! Gathers the inputs of context assembly: pinned file contents, retrieval
//! results and file summaries. Summaries that went stale since the last
//! scan are regenerated, a few per user message.

use std::path::PathBuf;
use std::sync::Arc;

use llmcode_core::{EventBus, FileSummary, Provider, Session};
use llmcode_memory::{RetrievalIndex, ScoredChunk, SummaryOptions, SummaryStore};
use tracing::{debug, warn};

use super::assembler::PinnedFile;

/// Retrieval output for one user message.
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    pub chunks: Vec<ScoredChunk>,
    pub summaries: Vec<FileSummary>,
}

pub struct ContextSources {
    root: PathBuf,
    index: Option<Arc<RetrievalIndex>>,
    summaries: Option<(Arc<SummaryStore>, SummaryOptions)>,
    embedder: Option<Arc<dyn Provider>>,
    embed_model: Option<String>,
    max_regenerations: usize,
    events: Option<Arc<EventBus>>,
}

impl ContextSources {
    /// Sources with pinned files only; retrieval is disabled.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: None,
            summaries: None,
            embedder: None,
            embed_model: None,
            max_regenerations: 3,
            events: None,
        }
    }

    pub fn with_index(
        mut self,
        index: Arc<RetrievalIndex>,
        embedder: Arc<dyn Provider>,
        embed_model: Option<String>,
    ) -> Self {
        self.index = Some(index);
        self.embedder = Some(embedder);
        self.embed_model = embed_model;
        self
    }

    /// Attach the summary store. Stale summaries are regenerated through
    /// the index's provider with `options`.
    pub fn with_summaries(mut self, summaries: Arc<SummaryStore>, options: SummaryOptions) -> Self {
        self.summaries = Some((summaries, options));
        self
    }

    /// Cap on summaries regenerated per user message.
    pub fn with_max_regenerations(mut self, max: usize) -> Self {
        self.max_regenerations = max;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Current content of every pinned file, in inclusion order. Files that
    /// vanished or escape the root are skipped.
    pub async fn pinned(&self, session: &Session) -> Vec<PinnedFile> {
        let mut files = Vec::with_capacity(session.included_paths.len());
        for path in &session.included_paths {
            let target = match llmcode_security::resolve_in_root(&self.root, path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path, error = %e, "Skipping pinned file");
                    continue;
                }
            };
            match tokio::fs::read(&target).await {
                Ok(bytes) => files.push(PinnedFile {
                    path: path.clone(),
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                Err(e) => warn!(path, error = %e, "Pinned file unreadable"),
            }
        }
        files
    }

    /// Top-`k` chunks for `query` plus up-to-date summaries of their files.
    ///
    /// Retrieval failures degrade to an empty result; the turn goes ahead
    /// without retrieved context.
    pub async fn retrieve(&self, query: &str, k: usize) -> Retrieved {
        let (Some(index), Some(embedder)) = (&self.index, &self.embedder) else {
            return Retrieved::default();
        };
        if k == 0 || query.trim().is_empty() {
            return Retrieved::default();
        }

        let chunks = match index
            .query_text(embedder.as_ref(), self.embed_model.clone(), query, k)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without it");
                return Retrieved::default();
            }
        };

        let mut summaries = Vec::new();
        if let Some((store, options)) = &self.summaries {
            let mut seen: Vec<&str> = Vec::new();
            let mut regenerated = 0;
            for c in &chunks {
                let path = c.chunk.path.as_str();
                if seen.contains(&path) {
                    continue;
                }
                seen.push(path);
                if let Some(summary) = store.fresh(path).await {
                    summaries.push(summary);
                    continue;
                }
                if regenerated >= self.max_regenerations {
                    debug!(path, "Stale summary left out, regeneration cap reached");
                    continue;
                }
                regenerated += 1;
                match store
                    .get_summary(path, embedder.as_ref(), options, self.events.as_deref())
                    .await
                {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => warn!(path, error = %e, "Summary regeneration failed"),
                }
            }
        }

        debug!(
            chunks = chunks.len(),
            summaries = summaries.len(),
            "Retrieved context"
        );
        Retrieved { chunks, summaries }
    }
}
