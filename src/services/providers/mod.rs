//! External capabilities called by the pipeline stages
//!
//! Each stage delegates its one unit of work to a capability behind a trait:
//! emotion classification, text embedding, catalog nearest-neighbour search
//! and synopsis rewriting. The HTTP implementations speak small JSON
//! contracts; tests swap in mocks or in-memory versions.
use reqwest::Response;

use crate::{
    error::{AppError, AppResult},
    models::{CandidateRecord, Emotion},
};

pub mod catalog;
pub mod classifier;
pub mod embedding;
pub mod rewriter;

pub use catalog::{cosine_similarity, CatalogMovie, InMemoryCatalog, PgCatalog};
pub use classifier::HttpEmotionClassifier;
pub use embedding::HttpEmbedder;
pub use rewriter::HttpSynopsisRewriter;

/// Detects the dominant emotion in free text
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> AppResult<Emotion>;
}

/// Maps text to a fixed-dimension vector
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Read-only nearest-neighbour search over the movie catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// Top `k` movies by similarity to `query`, best first
    async fn nearest(&self, query: &[f32], k: usize) -> AppResult<Vec<CatalogMatch>>;
}

/// Rewrites a synopsis for the reader's mood
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SynopsisRewriter: Send + Sync {
    async fn rewrite(&self, synopsis: &str, emotion: Emotion) -> AppResult<String>;
}

/// A catalog hit before it becomes a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMatch {
    pub movie: CatalogMovie,
    pub score: f32,
}

impl CatalogMatch {
    pub fn into_candidate(self, emotion: Emotion) -> CandidateRecord {
        CandidateRecord {
            title: self.movie.title,
            genre: self.movie.genre,
            rating: self.movie.rating,
            synopsis: crate::models::synopsis_preview(&self.movie.synopsis),
            personalized_synopsis: None,
            score: self.score,
            emotion,
        }
    }
}

/// Turns a non-2xx response into an [`AppError::ExternalApi`]
pub(crate) async fn ensure_success(service: &str, response: Response) -> AppResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(AppError::ExternalApi(format!(
        "{} returned status {}: {}",
        service, status, body
    )))
}
