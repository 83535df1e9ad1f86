//! Provider implementations for llmcode.
//!
//! [`ServerClient`] implements `llmcode_core::Provider` against the
//! routing server's HTTP API.

pub mod server;
pub mod sse;

pub use server::ServerClient;
