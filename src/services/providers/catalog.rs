use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use super::{Catalog, CatalogMatch};
use crate::error::AppResult;

/// Descriptive fields of a catalog movie
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMovie {
    pub title: String,
    pub synopsis: String,
    pub genre: Option<String>,
    pub rating: Option<f32>,
}

/// Cosine similarity in [-1, 1]; `None` for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(similarity.clamp(-1.0, 1.0) as f32)
}

/// Full scan: scores every movie, keeps the best `k`
fn rank<'a, I>(query: &[f32], movies: I, k: usize) -> Vec<CatalogMatch>
where
    I: IntoIterator<Item = (&'a CatalogMovie, &'a [f32])>,
{
    let mut matches: Vec<CatalogMatch> = movies
        .into_iter()
        .filter_map(|(movie, embedding)| {
            cosine_similarity(query, embedding).map(|score| CatalogMatch {
                movie: movie.clone(),
                score,
            })
        })
        .collect();

    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(k);
    matches
}

/// Catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    movies: Vec<(CatalogMovie, Vec<f32>)>,
}

impl InMemoryCatalog {
    pub fn new(movies: Vec<(CatalogMovie, Vec<f32>)>) -> Self {
        Self { movies }
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn nearest(&self, query: &[f32], k: usize) -> AppResult<Vec<CatalogMatch>> {
        Ok(rank(
            query,
            self.movies.iter().map(|(m, e)| (m, e.as_slice())),
            k,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MovieRow {
    title: String,
    synopsis: String,
    genre: Option<String>,
    rating: Option<f32>,
    embedding: Vec<f32>,
}

/// Catalog stored in PostgreSQL.
///
/// Reads `movies(title, synopsis, genre, rating REAL, embedding REAL[])` and
/// ranks in process. Rows whose embedding has the wrong dimension are skipped.
#[derive(Clone)]
pub struct PgCatalog {
    db_pool: PgPool,
}

impl PgCatalog {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Opens a small connection pool
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self::new(db_pool))
    }
}

#[async_trait::async_trait]
impl Catalog for PgCatalog {
    async fn nearest(&self, query: &[f32], k: usize) -> AppResult<Vec<CatalogMatch>> {
        let rows: Vec<MovieRow> = sqlx::query_as(
            r#"
            SELECT title, synopsis, genre, rating, embedding
            FROM movies
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let movies: Vec<(CatalogMovie, Vec<f32>)> = rows
            .into_iter()
            .map(|row| {
                (
                    CatalogMovie {
                        title: row.title,
                        synopsis: row.synopsis,
                        genre: row.genre,
                        rating: row.rating,
                    },
                    row.embedding,
                )
            })
            .collect();

        let matches = rank(query, movies.iter().map(|(m, e)| (m, e.as_slice())), k);

        tracing::debug!(
            scanned = movies.len(),
            returned = matches.len(),
            "Catalog search completed"
        );

        Ok(matches)
    }
}
