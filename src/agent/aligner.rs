// SYNOID Repurpose - Transcript Aligner
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Maps timestamped transcript tokens onto detected scene intervals. Each token lands in
// exactly one scene, chosen by its midpoint; every scene appears in the output, even silent
// ones.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::transcription::{normalize_tokens, TranscriptToken};
use crate::error::{PipelineError, PipelineResult};

/// A detected contiguous video segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneInterval {
    pub id: u32,
    pub start: f64,
    pub end: f64,
}

impl SceneInterval {
    pub fn new(id: u32, start: f64, end: f64) -> Self {
        Self { id, start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedScene {
    pub scene: SceneInterval,
    pub visual_description: Option<String>,
    pub screenshot: Option<PathBuf>,
    pub dialogue: String,
}

/// Scenes must be well-formed, ordered by start and non-overlapping. Gaps are fine.
pub fn validate_scenes(scenes: &[SceneInterval]) -> PipelineResult<()> {
    for (i, scene) in scenes.iter().enumerate() {
        if !scene.start.is_finite() || !scene.end.is_finite() {
            return Err(PipelineError::Validation(format!(
                "scene {} has non-finite bounds",
                scene.id
            )));
        }
        if scene.start >= scene.end {
            return Err(PipelineError::Validation(format!(
                "scene {} has start {:.3}s >= end {:.3}s",
                scene.id, scene.start, scene.end
            )));
        }
        if i > 0 {
            let prev = &scenes[i - 1];
            if scene.start < prev.end {
                return Err(PipelineError::Validation(format!(
                    "scene {} starts at {:.3}s before scene {} ends at {:.3}s",
                    scene.id, scene.start, prev.id, prev.end
                )));
            }
        }
    }
    Ok(())
}

/// Index of the scene that owns a timestamp.
///
/// Bounds are inclusive, so a midpoint sitting exactly on a shared boundary belongs to the
/// earlier scene. A midpoint in a gap goes to the preceding scene; one before the first
/// scene or after the last is clipped to that boundary scene. `scenes` must be non-empty.
pub fn scene_for(scenes: &[SceneInterval], t: f64) -> usize {
    let first_reaching = scenes.partition_point(|s| s.end < t);
    if first_reaching == scenes.len() {
        return scenes.len() - 1;
    }
    if scenes[first_reaching].start <= t {
        first_reaching
    } else {
        first_reaching.saturating_sub(1)
    }
}

/// Assign every token to a scene and join each scene's tokens into its dialogue.
///
/// Validation runs before any assignment, so a malformed input yields no partial result.
pub fn align(scenes: &[SceneInterval], tokens: &[TranscriptToken]) -> PipelineResult<Vec<AlignedScene>> {
    validate_scenes(scenes)?;
    let tokens = normalize_tokens(tokens)?;

    if scenes.is_empty() {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        return Err(PipelineError::Validation(format!(
            "{} transcript tokens but no scenes to assign them to",
            tokens.len()
        )));
    }

    info!(
        "[ALIGN] Aligning {} tokens onto {} scenes",
        tokens.len(),
        scenes.len()
    );

    let mut buckets: Vec<Vec<&str>> = vec![Vec::new(); scenes.len()];
    for token in &tokens {
        let idx = scene_for(scenes, token.midpoint());
        debug!(
            "[ALIGN] {:?} @ {:.2}s -> scene {}",
            token.text,
            token.midpoint(),
            scenes[idx].id
        );
        buckets[idx].extend(token.text.split_whitespace());
    }

    let aligned: Vec<AlignedScene> = scenes
        .iter()
        .zip(buckets)
        .map(|(scene, words)| AlignedScene {
            scene: *scene,
            visual_description: None,
            screenshot: None,
            dialogue: words.join(" "),
        })
        .collect();

    let silent = aligned.iter().filter(|s| s.dialogue.is_empty()).count();
    info!("[ALIGN] Transcript aligned ({} silent scenes)", silent);
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenes(bounds: &[(f64, f64)]) -> Vec<SceneInterval> {
        bounds
            .iter()
            .enumerate()
            .map(|(i, (s, e))| SceneInterval::new(i as u32 + 1, *s, *e))
            .collect()
    }

    #[test]
    fn test_boundary_goes_to_earlier_scene() {
        let s = scenes(&[(0.0, 5.0), (5.0, 12.0)]);
        assert_eq!(scene_for(&s, 5.0), 0);
        assert_eq!(scene_for(&s, 5.01), 1);
    }

    #[test]
    fn test_gap_goes_to_preceding_scene() {
        let s = scenes(&[(0.0, 4.0), (6.0, 10.0)]);
        assert_eq!(scene_for(&s, 5.9), 0);
        assert_eq!(scene_for(&s, 4.1), 0);
    }

    #[test]
    fn test_outside_range_clips() {
        let s = scenes(&[(2.0, 4.0), (4.0, 8.0)]);
        assert_eq!(scene_for(&s, 0.5), 0);
        assert_eq!(scene_for(&s, 99.0), 1);
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let s = scenes(&[(0.0, 10.0)]);
        let tokens = vec![
            TranscriptToken::new("  hello   ", 0.0, 1.0),
            TranscriptToken::new("big\tworld", 1.0, 2.0),
            TranscriptToken::new("   ", 2.0, 3.0),
        ];
        let aligned = align(&s, &tokens).unwrap();
        assert_eq!(aligned[0].dialogue, "hello big world");
    }

    #[test]
    fn test_overlapping_scenes_rejected() {
        let s = scenes(&[(0.0, 5.0), (4.0, 8.0)]);
        assert!(matches!(align(&s, &[]), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_degenerate_scene_rejected() {
        let s = scenes(&[(3.0, 3.0)]);
        assert!(matches!(align(&s, &[]), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_tokens_without_scenes_rejected() {
        let tokens = vec![TranscriptToken::new("lost", 0.0, 1.0)];
        assert!(align(&[], &tokens).is_err());
        assert!(align(&[], &[]).unwrap().is_empty());
    }
}
