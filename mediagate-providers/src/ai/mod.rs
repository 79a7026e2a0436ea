//! AI Provider (LLM + embeddings) client

pub mod client;
pub mod types;

pub use client::{AiClient, TranslateMode};
pub use types::RecommendedTitle;
