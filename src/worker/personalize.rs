use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

use super::Stage;
use crate::{
    error::AppResult,
    models::{MessageError, PipelineMessage},
    services::providers::SynopsisRewriter,
};

/// Rewrites each candidate's synopsis for the detected mood.
///
/// Best effort: a failed, slow or skipped rewrite leaves the original
/// synopsis in place and the message still moves on.
pub struct PersonalizeStage {
    rewriter: Arc<dyn SynopsisRewriter>,
    call_timeout: Duration,
    budget: Duration,
}

impl PersonalizeStage {
    /// `call_timeout` bounds one rewrite, `budget` the whole message
    pub fn new(rewriter: Arc<dyn SynopsisRewriter>, call_timeout: Duration, budget: Duration) -> Self {
        Self {
            rewriter,
            call_timeout,
            budget,
        }
    }
}

#[async_trait::async_trait]
impl Stage for PersonalizeStage {
    fn name(&self) -> &'static str {
        "personalization"
    }

    fn validate(&self, message: &PipelineMessage) -> Result<(), MessageError> {
        message.require_candidates().map(|_| ())
    }

    async fn process(&self, mut message: PipelineMessage) -> AppResult<PipelineMessage> {
        let deadline = Instant::now() + self.budget;
        let request_id = message.request_id;
        let mut rewritten = 0usize;

        for candidate in message.candidates.iter_mut().flatten() {
            candidate.personalized_synopsis = None;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(title = %candidate.title, "Personalization budget spent, keeping original");
                continue;
            }

            let call = self.rewriter.rewrite(&candidate.synopsis, candidate.emotion);
            match tokio::time::timeout(self.call_timeout.min(remaining), call).await {
                Ok(Ok(text)) => {
                    candidate.personalized_synopsis = Some(text);
                    rewritten += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(title = %candidate.title, error = %e, "Rewrite failed, keeping original");
                }
                Err(_) => {
                    tracing::warn!(title = %candidate.title, "Rewrite timed out, keeping original");
                }
            }
        }

        tracing::debug!(
            request_id = ?request_id,
            rewritten,
            total = message.candidates.as_ref().map_or(0, Vec::len),
            "Synopses personalized"
        );

        Ok(message)
    }
}
