pub mod candidate;
pub mod emotion;
pub mod message;
pub mod token;

pub use candidate::{rank_by_score, synopsis_preview, CandidateRecord};
pub use emotion::{Emotion, UnknownEmotion};
pub use message::{MessageError, PipelineMessage, RecommendationPayload};
pub use token::CorrelationToken;
