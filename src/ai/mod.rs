//! All AI/LLM functionality

pub mod client;
pub mod sse;

// Re-export main types for convenience
pub use client::{ChatStream, LlmClient, estimate_tokens, fit_context_window};
pub use sse::StreamEvent;
