//! Client side of result delivery: ask for a token's result until it is
//! ready or the time budget runs out.
//!
//! A timeout is not a failure. The pipeline keeps working and a late result
//! waits in the store until it is collected or evicted.

use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

use super::{providers::ensure_success, ResultStore};
use crate::{
    api::ResultResponse,
    error::AppResult,
    models::{CorrelationToken, RecommendationPayload},
};

/// Answer to a single result query
#[derive(Debug, Clone, PartialEq)]
pub enum ResultStatus {
    Ready(RecommendationPayload),
    Pending,
}

/// Somewhere a result can be asked for by token
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch(&self, token: &CorrelationToken) -> AppResult<ResultStatus>;
}

#[async_trait::async_trait]
impl ResultSource for ResultStore {
    async fn fetch(&self, token: &CorrelationToken) -> AppResult<ResultStatus> {
        Ok(match self.take(token).await {
            Some(payload) => ResultStatus::Ready(payload),
            None => ResultStatus::Pending,
        })
    }
}

#[async_trait::async_trait]
impl<T: ResultSource + ?Sized> ResultSource for Arc<T> {
    async fn fetch(&self, token: &CorrelationToken) -> AppResult<ResultStatus> {
        (**self).fetch(token).await
    }
}

/// Queries a gateway's `GET /get_result/{request_id}`
#[derive(Debug, Clone)]
pub struct HttpResultSource {
    http_client: Client,
    base_url: String,
}

impl HttpResultSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ResultSource for HttpResultSource {
    async fn fetch(&self, token: &CorrelationToken) -> AppResult<ResultStatus> {
        let url = format!("{}/get_result/{}", self.base_url, token);
        let response = self.http_client.get(&url).send().await?;
        let response = ensure_success("Gateway", response).await?;

        Ok(match response.json::<ResultResponse>().await? {
            ResultResponse::Ready {
                request_id,
                emotion,
                recommendations,
            } => ResultStatus::Ready(RecommendationPayload {
                request_id,
                emotion,
                recommendations,
            }),
            ResultResponse::Pending { .. } => ResultStatus::Pending,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause between two queries
    pub interval: Duration,
    /// Wall-clock budget for the whole loop
    pub max_duration: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready(RecommendationPayload),
    /// Budget spent while the request was still processing
    Timeout,
}

/// Polls `source` for `token` until ready or out of time.
///
/// A transport error from the source ends the loop and is returned.
pub async fn poll<S>(source: &S, token: &CorrelationToken, config: &PollConfig) -> AppResult<PollOutcome>
where
    S: ResultSource + ?Sized,
{
    let deadline = Instant::now() + config.max_duration;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let ResultStatus::Ready(payload) = source.fetch(token).await? {
            tracing::debug!(request_id = %token, attempts, "Result ready");
            return Ok(PollOutcome::Ready(payload));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::info!(request_id = %token, attempts, "Still processing after poll budget");
            return Ok(PollOutcome::Timeout);
        }

        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}
