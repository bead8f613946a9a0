//! Narrative generation.
//!
//! Builds a prompt from the report, asks the summarization model for a
//! governance narrative and falls back to a deterministic template when the
//! model path fails.

pub mod client;
pub mod engine;
pub mod fallback;
pub mod prompt;

pub use client::{GenerationParams, ModelClient, OllamaClient};
pub use engine::{EngineConfig, NarrativeEngine, NarrativeState, RetryPolicy};
pub use fallback::{synthesize_fallback, AI_UNAVAILABLE_NOTE};
pub use prompt::build_prompt;
