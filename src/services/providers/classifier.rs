use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ensure_success, EmotionClassifier};
use crate::{
    error::{AppError, AppResult},
    models::Emotion,
};

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    label: String,
}

/// Emotion classifier reached over HTTP.
///
/// `POST {url}` with `{"text": ...}`, expects `{"label": ...}`. A label outside
/// the taxonomy counts as a malformed response.
#[derive(Clone)]
pub struct HttpEmotionClassifier {
    http_client: HttpClient,
    url: String,
}

impl HttpEmotionClassifier {
    pub fn new(url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http_client, url })
    }
}

#[async_trait::async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    async fn classify(&self, text: &str) -> AppResult<Emotion> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&ClassifyRequest { text })
            .send()
            .await?;
        let response = ensure_success("Emotion classifier", response).await?;

        let body: ClassifyResponse = response.json().await?;
        let emotion = parse_label(&body.label)?;

        tracing::debug!(label = %body.label, emotion = %emotion, "Text classified");
        Ok(emotion)
    }
}

fn parse_label(label: &str) -> AppResult<Emotion> {
    label
        .parse()
        .map_err(|e| AppError::ExternalApi(format!("Emotion classifier: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_maps_catch_all() {
        assert_eq!(parse_label("others").unwrap(), Emotion::Neutral);
    }

    #[test]
    fn test_parse_label_rejects_unknown() {
        let err = parse_label("ennui").unwrap_err();
        assert!(matches!(err, AppError::ExternalApi(_)));
    }

    #[test]
    fn test_response_shape() {
        let body: ClassifyResponse = serde_json::from_str(r#"{"label": "sadness", "score": 0.93}"#).unwrap();
        assert_eq!(body.label, "sadness");
    }
}
