//! Backend trait seams for inference providers.

use async_trait::async_trait;

use crate::Result;

/// Generates dense vector embeddings for text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text into a fixed-dimension vector.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimension of vectors produced by this backend.
    fn dimension(&self) -> usize;
}

/// Generates text completions, optionally constrained to JSON output.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a completion with the backend's JSON output mode enabled.
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

/// Combined backend used by the ingestion pipeline.
pub trait InferenceBackend: EmbeddingBackend + GenerationBackend {
    /// View this backend as a generation backend.
    fn as_generation(&self) -> &dyn GenerationBackend;

    /// View this backend as an embedding backend.
    fn as_embedding(&self) -> &dyn EmbeddingBackend;
}

impl<T: EmbeddingBackend + GenerationBackend> InferenceBackend for T {
    fn as_generation(&self) -> &dyn GenerationBackend {
        self
    }

    fn as_embedding(&self) -> &dyn EmbeddingBackend {
        self
    }
}
