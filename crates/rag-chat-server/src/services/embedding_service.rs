use crate::config::EmbeddingConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
// Import trait from conversation manager
use crate::services::conversation::manager::EmbeddingProvider;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }
}

/// Accepts `{"data": [{"embedding": [...]}]}`, `{"embedding": [...]}` or a bare array
fn parse_embedding(json_value: &Value) -> Result<Vec<f32>> {
    let raw = json_value
        .pointer("/data/0/embedding")
        .or_else(|| json_value.get("embedding"))
        .or_else(|| json_value.pointer("/0/embedding"))
        .or(Some(json_value))
        .and_then(Value::as_array)
        .with_context(|| format!("Unrecognized embedding response format: {}", json_value))?;

    let embedding: Vec<f32> = raw
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if embedding.is_empty() || embedding.len() != raw.len() {
        anyhow::bail!("Embedding response holds no usable vector");
    }

    Ok(embedding)
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_internal(text).await
    }
}
