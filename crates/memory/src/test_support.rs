//! Deterministic provider used by the store tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use llmcode_core::{
    CompletionRequest, CompletionStream, EmbeddingRequest, EmbeddingResponse, Provider,
    ProviderError, StreamEvent, Usage,
};

const KEYWORDS: [&str; 4] = ["config", "parse", "test", "main"];

/// Embeds text as keyword counts and answers completions with a
/// numbered summary. Counts every call.
#[derive(Default)]
pub(crate) struct KeywordEmbedder {
    embed_calls: AtomicUsize,
    max_batch: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch.load(Ordering::SeqCst)
    }

    pub fn summaries(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<CompletionStream, ProviderError> {
        let n = self.stream_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CompletionStream::from_events(vec![
            StreamEvent::token(format!("summary #{n}")),
            StreamEvent::Done {
                usage: Usage::default(),
            },
        ]))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.max_batch.fetch_max(request.texts.len(), Ordering::SeqCst);
        let embeddings = request
            .texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| lower.matches(k).count() as f32 + 0.01)
                    .collect()
            })
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: "keyword".into(),
            usage: None,
        })
    }
}
