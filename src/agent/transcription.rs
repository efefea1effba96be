// SYNOID Repurpose - Transcript Tokens
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::aligner::SceneInterval;
use crate::error::{PipelineError, PipelineResult, ServiceError};

/// A timestamped word (or segment, when the transcriber has no word timing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptToken {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl TranscriptToken {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// What the transcriber returned: timed tokens, or bare text when the provider gave no timing.
#[derive(Debug, Clone, PartialEq)]
pub enum Transcript {
    Timed(Vec<TranscriptToken>),
    Untimed(String),
}

impl Transcript {
    /// Timed tokens as-is; untimed text is spread evenly over the scenes.
    pub fn into_tokens(self, scenes: &[SceneInterval]) -> Vec<TranscriptToken> {
        match self {
            Transcript::Timed(tokens) => tokens,
            Transcript::Untimed(text) => {
                warn!("[EAR] Transcript has no timestamps, spreading words evenly across scenes");
                spread_untimed(&text, scenes)
            }
        }
    }
}

/// One token per scene holding an equal share of the words; the last scene takes the rest.
pub fn spread_untimed(text: &str, scenes: &[SceneInterval]) -> Vec<TranscriptToken> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || scenes.is_empty() {
        return Vec::new();
    }
    let per_scene = (words.len() / scenes.len()).max(1);

    let mut tokens = Vec::new();
    for (i, scene) in scenes.iter().enumerate() {
        let start = (i * per_scene).min(words.len());
        let end = if i + 1 == scenes.len() {
            words.len()
        } else {
            (start + per_scene).min(words.len())
        };
        if start < end {
            tokens.push(TranscriptToken::new(words[start..end].join(" "), scene.start, scene.end));
        }
    }
    tokens
}

/// Reject tokens with broken timing and restore `start` order.
///
/// The sort is stable, so tokens sharing a start time keep their original order.
pub fn normalize_tokens(tokens: &[TranscriptToken]) -> PipelineResult<Vec<TranscriptToken>> {
    for (i, token) in tokens.iter().enumerate() {
        if !token.start.is_finite() || !token.end.is_finite() {
            return Err(PipelineError::Validation(format!(
                "token {} ({:?}) has non-finite timing",
                i, token.text
            )));
        }
        if token.start > token.end {
            return Err(PipelineError::Validation(format!(
                "token {} ({:?}) starts at {:.3}s after it ends at {:.3}s",
                i, token.text, token.start, token.end
            )));
        }
    }

    let mut sorted = tokens.to_vec();
    if sorted.windows(2).any(|w| w[1].start < w[0].start) {
        warn!("[EAR] Transcript tokens arrived out of order, re-sorting by start time");
        sorted.sort_by(|a, b| a.start.total_cmp(&b.start));
    }
    Ok(sorted)
}

/// Convert a `verbose_json` transcription body into tokens.
///
/// Word timings are preferred, then segment timings, then bare text.
pub fn transcript_from_verbose_json(body: &Value) -> Result<Transcript, ServiceError> {
    let words = body["words"].as_array().map(|w| collect_timed(w, "word"));
    if let Some(words) = words.filter(|w| !w.is_empty()) {
        info!("[EAR] Transcript carries {} timed words", words.len());
        return Ok(Transcript::Timed(words));
    }

    let segments = body["segments"].as_array().map(|s| collect_timed(s, "text"));
    if let Some(segments) = segments.filter(|s| !s.is_empty()) {
        info!("[EAR] No word timing, using {} segments", segments.len());
        return Ok(Transcript::Timed(segments));
    }

    match body["text"].as_str() {
        Some(text) if text.trim().is_empty() => Ok(Transcript::Timed(Vec::new())),
        Some(text) => Ok(Transcript::Untimed(text.trim().to_string())),
        None => Err(ServiceError::InvalidResponse(
            "transcript body has no words, segments or text".to_string(),
        )),
    }
}

fn collect_timed(items: &[Value], text_key: &str) -> Vec<TranscriptToken> {
    items
        .iter()
        .filter_map(|item| {
            let text = item[text_key].as_str()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(TranscriptToken::new(
                text,
                item["start"].as_f64()?,
                item["end"].as_f64()?,
            ))
        })
        .collect()
}
