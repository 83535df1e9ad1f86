//! Context management: what accompanies each model turn.
//!
//! [`ContextSources`] does the I/O (pinned files, retrieval, summaries);
//! [`ContextAssembler`] turns the result plus session history into a
//! bounded prompt.

pub mod assembler;
pub mod sources;
pub mod token;

pub use assembler::{
    AssembledPrompt, AssemblyError, AssemblyInput, AssemblyMetadata, ContextAssembler,
    ContextSnapshot, DropInfo, LayerStats, PinnedFile,
};
pub use sources::{ContextSources, Retrieved};
