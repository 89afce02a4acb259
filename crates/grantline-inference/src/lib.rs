//! # grantline-inference
//!
//! Ollama-backed inference for grantline: text embeddings for semantic
//! search, structured extraction of opportunity data, and fallback status
//! classification. A [`MockBackend`] backs unit tests.

pub mod classify;
pub mod extract;
pub mod mock;
pub mod ollama;

pub use classify::classify_status;
pub use extract::{extract_opportunity_data, parse_llm_response, ExtractedData};
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
