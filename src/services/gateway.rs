use std::sync::Arc;

use crate::{
    broker::{Channel, ChannelError, Queue},
    error::{AppError, AppResult},
    models::{CorrelationToken, PipelineMessage},
};

/// Entry point of the pipeline: mints a token and publishes the first message
#[derive(Clone)]
pub struct RequestGateway {
    channel: Arc<dyn Channel>,
}

impl RequestGateway {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Submits free text to the pipeline and returns its token without
    /// waiting for any stage.
    ///
    /// Blank text is rejected before anything is published. While the broker
    /// is not ready the call fails with [`AppError::ChannelUnavailable`].
    pub async fn submit(&self, text: &str) -> AppResult<CorrelationToken> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput("Query must not be empty".to_string()));
        }

        if !self.channel.is_available() {
            return Err(AppError::ChannelUnavailable(format!(
                "{} broker is {}",
                self.channel.name(),
                self.channel.state()
            )));
        }

        let token = CorrelationToken::new();
        let body = PipelineMessage::new_request(token, text)
            .encode()
            .map_err(ChannelError::from)?;

        self.channel
            .publish(Queue::Requests, &body)
            .await
            .map_err(|e| match e {
                ChannelError::Json(_) => AppError::from(e),
                other => AppError::ChannelUnavailable(other.to_string()),
            })?;

        tracing::info!(request_id = %token, "Request submitted");
        Ok(token)
    }
}
