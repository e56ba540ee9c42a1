use std::{sync::Arc, time::Duration};

use super::{Disposition, MessageHandler};
use crate::{
    broker::{Channel, Delivery, Queue},
    error::AppResult,
    models::{MessageError, PipelineMessage},
};

/// One unit of pipeline work backed by one external capability
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Checks the stage-specific input fields; an error marks the message as poison
    fn validate(&self, message: &PipelineMessage) -> Result<(), MessageError>;

    /// Calls the capability and returns the enriched message
    async fn process(&self, message: PipelineMessage) -> AppResult<PipelineMessage>;
}

/// Runs a [`Stage`] between an input queue and an output queue.
///
/// The enriched message is published before the input is acknowledged, so a
/// crash in between redelivers the input and repeats the work rather than
/// losing it. Downstream tolerates the duplicate because the result sink
/// overwrites by correlation token.
pub struct StageWorker<S> {
    stage: S,
    channel: Arc<dyn Channel>,
    output: Queue,
    timeout: Duration,
}

impl<S: Stage> StageWorker<S> {
    pub fn new(stage: S, channel: Arc<dyn Channel>, output: Queue, timeout: Duration) -> Self {
        Self {
            stage,
            channel,
            output,
            timeout,
        }
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }
}

#[async_trait::async_trait]
impl<S: Stage> MessageHandler for StageWorker<S> {
    async fn on_message(&self, delivery: &Delivery) -> Disposition {
        let stage = self.stage.name();

        let message = match PipelineMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => return Disposition::Discard(e.to_string()),
        };
        let token = match message.require_token() {
            Ok(token) => token,
            Err(e) => return Disposition::Discard(e.to_string()),
        };
        if let Err(e) = self.stage.validate(&message) {
            tracing::warn!(request_id = %token, stage, error = %e, "Invalid stage input");
            return Disposition::Discard(e.to_string());
        }

        let mut output = match tokio::time::timeout(self.timeout, self.stage.process(message)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %token, stage, error = %e, "Stage capability failed");
                return Disposition::Requeue(e.to_string());
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %token,
                    stage,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Stage capability timed out"
                );
                return Disposition::Requeue(format!("{} timed out", stage));
            }
        };

        // The token travels unchanged whatever the stage did with the message
        output.request_id = Some(token);

        let body = match output.encode() {
            Ok(body) => body,
            Err(e) => return Disposition::Requeue(format!("encoding failed: {}", e)),
        };
        if let Err(e) = self.channel.publish(self.output, &body).await {
            return Disposition::Requeue(format!("publish to {} failed: {}", self.output, e));
        }

        tracing::info!(request_id = %token, stage, output = %self.output, "Stage completed");
        Disposition::Ack
    }
}
