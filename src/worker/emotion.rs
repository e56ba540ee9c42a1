use std::sync::Arc;

use super::Stage;
use crate::{
    error::AppResult,
    models::{MessageError, PipelineMessage},
    services::providers::EmotionClassifier,
};

/// Detects the emotion in the request text
pub struct EmotionStage {
    classifier: Arc<dyn EmotionClassifier>,
}

impl EmotionStage {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait::async_trait]
impl Stage for EmotionStage {
    fn name(&self) -> &'static str {
        "emotion"
    }

    fn validate(&self, message: &PipelineMessage) -> Result<(), MessageError> {
        message.require_text().map(|_| ())
    }

    async fn process(&self, mut message: PipelineMessage) -> AppResult<PipelineMessage> {
        let emotion = self.classifier.classify(message.require_text()?).await?;
        message.emotion = Some(emotion);
        Ok(message)
    }
}
