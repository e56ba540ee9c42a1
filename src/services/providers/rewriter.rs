use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ensure_success, SynopsisRewriter};
use crate::{
    error::{AppError, AppResult},
    models::Emotion,
};

#[derive(Serialize)]
struct RewriteRequest<'a> {
    synopsis: &'a str,
    emotion: Emotion,
}

#[derive(Deserialize)]
struct RewriteResponse {
    text: String,
}

/// Generative text service that rewrites synopses
#[derive(Clone)]
pub struct HttpSynopsisRewriter {
    http_client: HttpClient,
    url: String,
    api_key: Option<String>,
}

impl HttpSynopsisRewriter {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl SynopsisRewriter for HttpSynopsisRewriter {
    async fn rewrite(&self, synopsis: &str, emotion: Emotion) -> AppResult<String> {
        let mut request = self
            .http_client
            .post(&self.url)
            .json(&RewriteRequest { synopsis, emotion });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = ensure_success("Synopsis rewriter", request.send().await?).await?;
        let body: RewriteResponse = response.json().await?;

        let text = body.text.trim();
        if text.is_empty() {
            return Err(AppError::ExternalApi(
                "Synopsis rewriter returned empty text".to_string(),
            ));
        }

        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn rewriter_for(server: &MockServer, api_key: Option<&str>) -> HttpSynopsisRewriter {
        HttpSynopsisRewriter::new(
            format!("{}/rewrite", server.uri()),
            api_key.map(str::to_string),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rewrite_sends_bearer_key_and_emotion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rewrite"))
            .and(header("authorization", "Bearer secret-key"))
            .and(body_json(json!({ "synopsis": "A boy and a dog.", "emotion": "sadness" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "  A gentle story.  " })))
            .expect(1)
            .mount(&server)
            .await;

        let text = rewriter_for(&server, Some("secret-key"))
            .rewrite("A boy and a dog.", Emotion::Sadness)
            .await
            .unwrap();
        assert_eq!(text, "A gentle story.");
    }

    #[tokio::test]
    async fn test_blank_rewrite_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "   " })))
            .mount(&server)
            .await;

        let err = rewriter_for(&server, None)
            .rewrite("A boy and a dog.", Emotion::Joy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalApi(ref msg) if msg.contains("empty text")));
    }

    #[tokio::test]
    async fn test_rejected_key_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = rewriter_for(&server, Some("wrong"))
            .rewrite("A boy and a dog.", Emotion::Joy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalApi(ref msg) if msg.contains("401")));
    }
}
