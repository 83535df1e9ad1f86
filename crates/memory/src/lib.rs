//! Project knowledge stores for llmcode.
//!
//! - [`RetrievalIndex`]: chunk embeddings with cosine nearest-neighbour search
//! - [`SummaryStore`]: per-file summaries invalidated by content hash
//! - [`SessionStore`]: saved conversations for `--continue`
//!
//! All state lives under `<project>/.llmcode/`.

pub mod chunker;
pub mod index;
mod persist;
pub mod scanner;
pub mod session_store;
pub mod summary;
pub mod vector;

#[cfg(test)]
mod test_support;

pub use chunker::chunk_text;
pub use index::{EmbedOptions, IndexOutcome, IndexStats, RetrievalIndex, ScoredChunk};
pub use scanner::{ScanOptions, ScannedFile, language_for, scan};
pub use session_store::SessionStore;
pub use summary::{SummaryOptions, SummaryStore};
pub use vector::cosine_similarity;
