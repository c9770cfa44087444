//! OpenAI-compatible embedding endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use rag_core::{Embedder, ProviderConfig};

use crate::error::{Error, Result};

/// Embeds queries through an HTTP `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    config: ProviderConfig,
}

impl HttpEmbedder {
    /// Build a client with the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}{}", self.config.api_base, self.config.path);
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });
        let res = self
            .client
            .post(url)
            .headers(crate::auth_headers(&self.config.api_key)?)
            .json(&body)
            .send()
            .await?;
        let json: Value = res.error_for_status()?.json().await?;

        parse_embedding_response(json)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> rag_core::Result<Vec<f32>> {
        let mut vectors = self.embed(&[text]).await?;
        debug!("Embedded query with model {}", self.config.model);
        vectors
            .pop()
            .ok_or_else(|| Error::invalid_response("Embedding response is empty.").into())
    }
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_response("Embedding response is missing data array."))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::invalid_response("Embedding item missing embedding array."))?;
        let mut vector = Vec::with_capacity(embedding.len());
        for value in embedding {
            let number = value
                .as_f64()
                .ok_or_else(|| Error::invalid_response("Embedding value must be numeric."))?;
            vector.push(number as f32);
        }
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
