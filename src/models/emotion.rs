use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Emotion taxonomy produced by the classifier stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Anger,
    Fear,
    Disgust,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Disgust,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }
}

impl Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Accepts the classifier's English labels, its `others` catch-all and the
    /// Spanish names the UI shows.
    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_lowercase().as_str() {
            "joy" | "alegría" | "alegria" => Ok(Emotion::Joy),
            "sadness" | "tristeza" => Ok(Emotion::Sadness),
            "anger" | "enojo" | "ira" => Ok(Emotion::Anger),
            "fear" | "miedo" => Ok(Emotion::Fear),
            "disgust" | "asco" => Ok(Emotion::Disgust),
            "surprise" | "sorpresa" => Ok(Emotion::Surprise),
            "neutral" | "others" | "otros" => Ok(Emotion::Neutral),
            _ => Err(UnknownEmotion(label.to_string())),
        }
    }
}
