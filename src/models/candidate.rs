use serde::{Deserialize, Serialize};

use super::Emotion;

/// Longest synopsis preview carried through the pipeline
pub const SYNOPSIS_PREVIEW_CHARS: usize = 150;

/// One recommended movie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub title: String,
    #[serde(default)]
    pub genre: Option<String>,
    /// External rating on a 0-10 scale
    #[serde(default)]
    pub rating: Option<f32>,
    /// Original synopsis, never removed
    pub synopsis: String,
    /// Rewritten synopsis, set only when personalization succeeded
    #[serde(default)]
    pub personalized_synopsis: Option<String>,
    /// Cosine similarity between the mood query and the synopsis
    pub score: f32,
    /// Emotion that produced this candidate
    pub emotion: Emotion,
}

impl CandidateRecord {
    /// Synopsis to show the user: the personalized one when available
    pub fn display_synopsis(&self) -> &str {
        self.personalized_synopsis
            .as_deref()
            .unwrap_or(&self.synopsis)
    }
}

/// Truncates a synopsis to a preview on a character boundary
pub fn synopsis_preview(synopsis: &str) -> String {
    let trimmed = synopsis.trim();
    if trimmed.chars().count() <= SYNOPSIS_PREVIEW_CHARS {
        return trimmed.to_string();
    }

    let mut preview: String = trimmed.chars().take(SYNOPSIS_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

/// Sorts candidates by descending score; NaN scores sink to the bottom
pub fn rank_by_score(candidates: &mut [CandidateRecord]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or_else(|| a.score.is_nan().cmp(&b.score.is_nan()))
    });
}
