use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ensure_success, Embedder};
use crate::error::{AppError, AppResult};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Sentence-embedding model reached over HTTP
#[derive(Clone)]
pub struct HttpEmbedder {
    http_client: HttpClient,
    url: String,
}

impl HttpEmbedder {
    pub fn new(url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&EmbedRequest { text })
            .send()
            .await?;
        let response = ensure_success("Embedding model", response).await?;

        let body: EmbedResponse = response.json().await?;
        if body.embedding.is_empty() || body.embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::ExternalApi(
                "Embedding model returned an invalid vector".to_string(),
            ));
        }

        Ok(body.embedding)
    }
}
