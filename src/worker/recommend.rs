use std::sync::Arc;

use super::Stage;
use crate::{
    error::AppResult,
    models::{rank_by_score, CandidateRecord, MessageError, PipelineMessage},
    services::providers::{Catalog, Embedder},
};

/// Placeholder replaced by the detected emotion in the query template
pub const EMOTION_PLACEHOLDER: &str = "{emotion}";

/// Ranks catalog movies against a mood query built from the emotion
pub struct RecommendStage {
    embedder: Arc<dyn Embedder>,
    catalog: Arc<dyn Catalog>,
    top_k: usize,
    query_template: String,
}

impl RecommendStage {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        catalog: Arc<dyn Catalog>,
        top_k: usize,
        query_template: String,
    ) -> Self {
        Self {
            embedder,
            catalog,
            top_k,
            query_template,
        }
    }

    fn mood_query(&self, emotion: &str) -> String {
        self.query_template.replace(EMOTION_PLACEHOLDER, emotion)
    }
}

#[async_trait::async_trait]
impl Stage for RecommendStage {
    fn name(&self) -> &'static str {
        "recommendation"
    }

    fn validate(&self, message: &PipelineMessage) -> Result<(), MessageError> {
        message.require_emotion().map(|_| ())
    }

    async fn process(&self, mut message: PipelineMessage) -> AppResult<PipelineMessage> {
        let emotion = message.require_emotion()?;
        let query = self.mood_query(emotion.as_str());

        let embedding = self.embedder.embed(&query).await?;
        let matches = self.catalog.nearest(&embedding, self.top_k).await?;

        let mut candidates: Vec<CandidateRecord> = matches
            .into_iter()
            .map(|m| m.into_candidate(emotion))
            .collect();
        rank_by_score(&mut candidates);
        candidates.truncate(self.top_k);

        tracing::debug!(emotion = %emotion, candidates = candidates.len(), "Candidates ranked");

        message.candidates = Some(candidates);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{CorrelationToken, Emotion},
        services::providers::{CatalogMatch, CatalogMovie, InMemoryCatalog, MockCatalog, MockEmbedder},
    };

    fn movie(title: &str, synopsis: &str) -> CatalogMovie {
        CatalogMovie {
            title: title.to_string(),
            synopsis: synopsis.to_string(),
            genre: None,
            rating: Some(8.1),
        }
    }

    fn sad_message() -> PipelineMessage {
        let mut message = PipelineMessage::new_request(CorrelationToken::new(), "me siento muy triste");
        message.emotion = Some(Emotion::Sadness);
        message
    }

    #[tokio::test]
    async fn test_embeds_templated_mood_query() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .withf(|text| text == "Películas para cuando me siento sadness")
            .times(1)
            .returning(|_| Ok(vec![1.0, 0.0]));

        let catalog = InMemoryCatalog::new(vec![(movie("Up", "Carl"), vec![1.0, 0.0])]);
        let stage = RecommendStage::new(
            Arc::new(embedder),
            Arc::new(catalog),
            5,
            "Películas para cuando me siento {emotion}".to_string(),
        );

        let output = stage.process(sad_message()).await.unwrap();
        let candidates = output.candidates.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].emotion, Emotion::Sadness);
    }

    #[tokio::test]
    async fn test_candidates_sorted_and_limited() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));

        // Catalog answers out of order and with more than asked for
        let mut catalog = MockCatalog::new();
        catalog.expect_nearest().returning(|_, _| {
            Ok(vec![
                CatalogMatch { movie: movie("low", "x"), score: 0.1 },
                CatalogMatch { movie: movie("high", "x"), score: 0.9 },
                CatalogMatch { movie: movie("mid", "x"), score: 0.5 },
            ])
        });

        let stage = RecommendStage::new(Arc::new(embedder), Arc::new(catalog), 2, "{emotion}".to_string());
        let candidates = stage.process(sad_message()).await.unwrap().candidates.unwrap();

        let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn test_long_synopsis_is_previewed() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![1.0]));
        let catalog = InMemoryCatalog::new(vec![(movie("Long", &"a".repeat(400)), vec![1.0])]);

        let stage = RecommendStage::new(Arc::new(embedder), Arc::new(catalog), 5, "{emotion}".to_string());
        let candidates = stage.process(sad_message()).await.unwrap().candidates.unwrap();

        assert!(candidates[0].synopsis.ends_with("..."));
        assert!(candidates[0].synopsis.len() < 400);
    }

    #[test]
    fn test_validate_requires_emotion() {
        let stage = RecommendStage::new(
            Arc::new(MockEmbedder::new()),
            Arc::new(MockCatalog::new()),
            5,
            "{emotion}".to_string(),
        );
        let message = PipelineMessage::new_request(CorrelationToken::new(), "hola");
        assert!(stage.validate(&message).is_err());
        assert!(stage.validate(&sad_message()).is_ok());
    }
}
