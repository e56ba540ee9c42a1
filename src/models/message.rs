use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CandidateRecord, CorrelationToken, Emotion};

/// Reasons a payload can never be processed by a stage
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload has no correlation token")]
    MissingToken,

    #[error("Payload is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Message carried between pipeline stages.
///
/// Every stage reads the fields it needs and fills in its own output field.
/// All fields are optional on the wire so a stage can tell a missing field
/// apart from a malformed payload and reject it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineMessage {
    #[serde(default)]
    pub request_id: Option<CorrelationToken>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub candidates: Option<Vec<CandidateRecord>>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl PipelineMessage {
    /// First message of a request, as published by the gateway
    pub fn new_request(request_id: CorrelationToken, text: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id),
            text: Some(text.into()),
            emotion: None,
            candidates: None,
            submitted_at: Some(Utc::now()),
        }
    }

    pub fn decode(body: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn require_token(&self) -> Result<CorrelationToken, MessageError> {
        self.request_id.ok_or(MessageError::MissingToken)
    }

    pub fn require_text(&self) -> Result<&str, MessageError> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(MessageError::MissingField("text"))
    }

    pub fn require_emotion(&self) -> Result<Emotion, MessageError> {
        self.emotion.ok_or(MessageError::MissingField("emotion"))
    }

    pub fn require_candidates(&self) -> Result<&[CandidateRecord], MessageError> {
        self.candidates
            .as_deref()
            .ok_or(MessageError::MissingField("candidates"))
    }
}

/// Final result of one request, as stored by the result sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPayload {
    pub request_id: CorrelationToken,
    pub emotion: Option<Emotion>,
    pub recommendations: Vec<CandidateRecord>,
}

impl TryFrom<PipelineMessage> for RecommendationPayload {
    type Error = MessageError;

    fn try_from(message: PipelineMessage) -> Result<Self, Self::Error> {
        let request_id = message.require_token()?;
        let recommendations = message
            .candidates
            .ok_or(MessageError::MissingField("candidates"))?;

        Ok(Self {
            request_id,
            emotion: message.emotion,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_carries_token_and_text() {
        let token = CorrelationToken::new();
        let message = PipelineMessage::new_request(token, "me siento muy triste");

        assert_eq!(message.require_token().unwrap(), token);
        assert_eq!(message.require_text().unwrap(), "me siento muy triste");
        assert!(message.submitted_at.is_some());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = PipelineMessage::decode("not json at all").unwrap_err();
        assert!(matches!(err, MessageError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_token() {
        let err = PipelineMessage::decode(r#"{"request_id": "nope", "text": "hola"}"#).unwrap_err();
        assert!(matches!(err, MessageError::Malformed(_)));
    }

    #[test]
    fn test_missing_token_is_detected() {
        let message = PipelineMessage::decode(r#"{"text": "hola"}"#).unwrap();
        assert!(matches!(message.require_token(), Err(MessageError::MissingToken)));
    }

    #[test]
    fn test_blank_text_is_missing() {
        let message = PipelineMessage::new_request(CorrelationToken::new(), "   ");
        assert!(matches!(
            message.require_text(),
            Err(MessageError::MissingField("text"))
        ));
    }

    #[test]
    fn test_unknown_emotion_label_is_malformed() {
        let body = format!(
            r#"{{"request_id": "{}", "emotion": "melancholy"}}"#,
            CorrelationToken::new()
        );
        assert!(matches!(
            PipelineMessage::decode(&body),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn test_payload_requires_candidates() {
        let message = PipelineMessage::new_request(CorrelationToken::new(), "hola");
        let err = RecommendationPayload::try_from(message).unwrap_err();
        assert!(matches!(err, MessageError::MissingField("candidates")));
    }
}
