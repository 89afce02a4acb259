//! Default endpoints, models and limits shared across crates.

/// Default Ollama endpoint (overridden by `OLLAMA_HOST`).
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default embedding model.
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default generation model for extraction and status classification.
pub const GEN_MODEL: &str = "qwen2.5:14b";

/// Embedding dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

/// Timeout for embedding requests outside the request path (seconds).
pub const EMBED_TIMEOUT_SECS: u64 = 120;

/// Timeout for query embedding on the request path (seconds).
pub const QUERY_EMBED_TIMEOUT_SECS: u64 = 5;

/// Timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Per-row timeout for LLM status classification during recompute (seconds).
pub const CLASSIFY_TIMEOUT_SECS: u64 = 60;

/// Wall-clock cap for a background recompute job (seconds).
pub const RECOMPUTE_JOB_CAP_SECS: u64 = 30 * 60;

/// Maximum characters of text sent to the LLM or the embedder.
pub const LLM_TEXT_CAP: usize = 8000;

/// Maximum length of a summary derived from the description.
pub const SUMMARY_FALLBACK_MAX: usize = 280;

/// Default HTTP port (overridden by `PORT`).
pub const API_PORT: u16 = 8081;
