//! rag-providers - HTTP adapters for external model services
//!
//! [`HttpEmbedder`] implements [`rag_core::Embedder`] against an
//! OpenAI-compatible embeddings endpoint; [`HttpReranker`] implements
//! [`rag_core::Reranker`] against a cross-encoder rerank endpoint.

mod embedding;
mod error;
mod rerank;

pub use embedding::HttpEmbedder;
pub use error::{Error, Result};
pub use rerank::HttpReranker;

use reqwest::header::{HeaderMap, AUTHORIZATION};

/// Bearer auth header, omitted for an empty key.
fn auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if !api_key.is_empty() {
        headers.insert(AUTHORIZATION, format!("Bearer {}", api_key).parse()?);
    }
    Ok(headers)
}
