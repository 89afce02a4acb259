//! Deterministic mock backend for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use grantline_core::{EmbeddingBackend, Error, GenerationBackend, Result};

/// Mock inference backend returning canned responses.
pub struct MockBackend {
    generation: Option<String>,
    embedding: Vec<f32>,
    fail_embeddings: bool,
    embed_calls: AtomicUsize,
    generate_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            generation: None,
            embedding: vec![0.1, 0.2, 0.3],
            fail_embeddings: false,
            embed_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Set the canned generation response.
    pub fn with_generation(mut self, response: &str) -> Self {
        self.generation = Some(response.to_string());
        self
    }

    /// Set the canned embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Make embedding calls fail (for degraded-path tests).
    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embeddings {
            return Err(Error::Embedding("mock embedding failure".to_string()));
        }
        Ok(self.embedding.clone())
    }

    fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generation
            .clone()
            .ok_or_else(|| Error::Inference("no canned generation response".to_string()))
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }
}
