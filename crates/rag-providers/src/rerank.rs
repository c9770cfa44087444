//! Cross-encoder rerank endpoint (`{ query, documents }` → `results[{index, relevance_score}]`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use rag_core::{ProviderConfig, Reranker};

use crate::error::{Error, Result};

/// Scores (query, document) pairs through an HTTP rerank service.
pub struct HttpReranker {
    client: Client,
    config: ProviderConfig,
}

impl HttpReranker {
    /// Build a client with the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    async fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let url = format!("{}{}", self.config.api_base, self.config.path);
        let body = serde_json::json!({
            "model": self.config.model,
            "query": query,
            "documents": documents,
        });
        let res = self
            .client
            .post(url)
            .headers(crate::auth_headers(&self.config.api_key)?)
            .json(&body)
            .send()
            .await?;
        let json: Value = res.error_for_status()?.json().await?;

        parse_rerank_response(json, documents.len())
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> rag_core::Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.rerank(query, texts).await?;
        debug!("Reranked {} documents with model {}", texts.len(), self.config.model);
        Ok(scores)
    }
}

/// Align scores to input order. Every input index must be scored.
fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_response("Rerank response is missing results array."))?;

    let mut scores: Vec<Option<f32>> = vec![None; doc_count];
    for item in results {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::invalid_response("Rerank result missing index."))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::invalid_response("Rerank result missing score."))?
            as f32;
        if let Some(slot) = scores.get_mut(index) {
            *slot = Some(score);
        }
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| {
            score.ok_or_else(|| Error::invalid_response(format!("Rerank result missing index {}.", i)))
        })
        .collect()
}
