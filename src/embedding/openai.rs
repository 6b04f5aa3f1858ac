//! OpenAI-compatible embedding client (feature `openai`)
//!
//! Synchronous on purpose: the engine is a single writer and every outbound
//! call carries the configured timeout.

use std::time::Duration;

use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::{MnemonError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Blocking client for the `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MnemonError::Config(format!("embedding client: {}", e)))?;
        Ok(Self {
            client,
            base_url: std::env::var("MNEMON_OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key,
            model,
            dimensions,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| MnemonError::Config("OPENAI_API_KEY required for openai embedder".into()))?;
        Self::new(
            api_key,
            DEFAULT_MODEL.to_string(),
            settings.vector_dimension,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    /// Batch embedding; the API accepts up to 2048 inputs per call
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(2048) {
            all.extend(self.request(chunk)?);
        }
        Ok(all)
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": inputs,
                "model": self.model,
                "dimensions": self.dimensions,
            }))
            .send()
            .map_err(|e| MnemonError::Database(format!("embedding request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(MnemonError::Database(format!(
                "embedding API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|e| MnemonError::Database(format!("embedding response: {}", e)))?;
        let items = data["data"]
            .as_array()
            .ok_or_else(|| MnemonError::Database("invalid embedding response format".into()))?;

        items
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect::<Vec<f32>>()
                    })
                    .ok_or_else(|| MnemonError::Database("missing embedding in response".into()))
            })
            .collect()
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| MnemonError::Database("empty embedding response".into()))
    }

    fn dim(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model
    }
}
