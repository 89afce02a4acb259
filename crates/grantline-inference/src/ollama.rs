//! Ollama inference backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use grantline_core::defaults::{
    EMBED_DIMENSION, EMBED_MODEL, EMBED_TIMEOUT_SECS, GEN_MODEL, GEN_TIMEOUT_SECS, OLLAMA_URL,
};
use grantline_core::{EmbeddingBackend, Error, GenerationBackend, Result};

/// Ollama inference backend for embeddings and JSON generation.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
    embed_timeout_secs: u64,
}

impl OllamaBackend {
    /// Create a new Ollama backend with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(
            OLLAMA_URL.to_string(),
            EMBED_MODEL.to_string(),
            GEN_MODEL.to_string(),
            EMBED_DIMENSION,
        )
    }

    /// Create a new Ollama backend with custom configuration.
    pub fn with_config(
        base_url: String,
        embed_model: String,
        gen_model: String,
        dimension: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GEN_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("building inference client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            base_url = base_url.as_str(),
            embed_model = embed_model.as_str(),
            gen_model = gen_model.as_str(),
            "Initializing Ollama backend"
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model,
            gen_model,
            dimension,
            embed_timeout_secs: EMBED_TIMEOUT_SECS,
        })
    }

    /// Create from environment variables (`OLLAMA_HOST`,
    /// `OLLAMA_EMBED_MODEL`, `OLLAMA_GEN_MODEL`, `OLLAMA_EMBED_DIM`).
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| OLLAMA_URL.to_string());
        let embed_model =
            std::env::var("OLLAMA_EMBED_MODEL").unwrap_or_else(|_| EMBED_MODEL.to_string());
        let gen_model = std::env::var("OLLAMA_GEN_MODEL").unwrap_or_else(|_| GEN_MODEL.to_string());
        let dimension = std::env::var("OLLAMA_EMBED_DIM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(EMBED_DIMENSION);

        Self::with_config(base_url, embed_model, gen_model, dimension)
    }

    async fn generate_internal(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let start = Instant::now();

        let request = GenerateRequest {
            model: self.gen_model.clone(),
            prompt: prompt.to_string(),
            format: json_mode.then(|| "json".to_string()),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "ollama returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("failed to parse response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            subsystem = "inference",
            component = "ollama",
            op = "generate",
            model = self.gen_model.as_str(),
            prompt_len = prompt.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > 30_000 {
            warn!(
                subsystem = "inference",
                component = "ollama",
                duration_ms = elapsed,
                slow = true,
                "Slow generation"
            );
        }

        Ok(parsed.response)
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();

        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(Duration::from_secs(self.embed_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("failed to parse response: {}", e)))?;

        debug!(
            subsystem = "inference",
            component = "ollama",
            op = "embed",
            model = self.embed_model.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding complete"
        );

        Ok(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_internal(prompt, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.generate_internal(prompt, true).await
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn embed_text_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "nomic-embed-text"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.25, -0.5, 1.0]})),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(
            server.uri(),
            "nomic-embed-text".into(),
            "qwen2.5:14b".into(),
            3,
        )
        .unwrap();

        let vec = backend.embed_text("grant search").await.unwrap();
        assert_eq!(vec, vec![0.25, -0.5, 1.0]);
        assert_eq!(backend.dimension(), 3);
    }

    #[tokio::test]
    async fn generate_json_sets_format_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"format": "json", "stream": false})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "{\"status\":\"posted\"}", "done": true})),
            )
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(
            server.uri(),
            "nomic-embed-text".into(),
            "qwen2.5:14b".into(),
            768,
        )
        .unwrap();

        let out = backend.generate_json("classify this").await.unwrap();
        assert_eq!(out, "{\"status\":\"posted\"}");
    }

    #[tokio::test]
    async fn non_success_status_is_an_inference_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = OllamaBackend::with_config(
            server.uri(),
            "nomic-embed-text".into(),
            "qwen2.5:14b".into(),
            768,
        )
        .unwrap();

        let err = backend.generate("x").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }
}
