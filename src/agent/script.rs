// SYNOID Repurpose - Script Formats
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Line-delimited reference scripts, the per-scene raw script and the structured
// video analysis file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::aligner::AlignedScene;
use crate::error::PipelineResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub raw_text: String,
    /// Id of the aligned scene the line was spoken in, for lines sourced from video.
    pub scene_ref: Option<u32>,
}

impl ScriptLine {
    pub fn new(raw_text: impl Into<String>, scene_ref: Option<u32>) -> Self {
        Self {
            raw_text: raw_text.into(),
            scene_ref,
        }
    }
}

/// One line per non-blank row, trimmed, in input order.
pub fn parse_script(text: &str) -> Vec<ScriptLine> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| ScriptLine::new(l, None))
        .collect()
}

/// Every scene with dialogue becomes one script line. Silent scenes contribute nothing.
pub fn flatten_scenes(scenes: &[AlignedScene]) -> Vec<ScriptLine> {
    scenes
        .iter()
        .filter(|s| !s.dialogue.trim().is_empty())
        .map(|s| ScriptLine::new(s.dialogue.trim(), Some(s.scene.id)))
        .collect()
}

/// Seconds as `M:SS`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn scene_timestamp(scene: &AlignedScene) -> String {
    format!(
        "{}-{}",
        format_timestamp(scene.scene.start),
        format_timestamp(scene.scene.end)
    )
}

/// Human-readable scene breakdown saved alongside the analysis file.
pub fn render_scene_script(scenes: &[AlignedScene]) -> String {
    let mut lines = Vec::new();
    for scene in scenes {
        let screenshot = scene
            .screenshot
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "N/A".to_string());
        lines.push(format!(
            "[SCENE {} | {} | {}]",
            scene.scene.id,
            scene_timestamp(scene),
            screenshot
        ));
        if let Some(description) = scene.visual_description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("Visual: {}", description));
        }
        if !scene.dialogue.is_empty() {
            lines.push(format!("Dialogue: {}", scene.dialogue));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub timestamp: String,
    pub screenshot: Option<PathBuf>,
    pub description: Option<String>,
    pub dialogue: String,
}

/// The structured analysis file: one record per aligned scene, in scene order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    pub video: String,
    pub total_scenes: usize,
    pub scenes: Vec<SceneRecord>,
}

impl VideoAnalysis {
    pub fn from_scenes(video: &Path, scenes: &[AlignedScene]) -> Self {
        Self {
            video: video.display().to_string(),
            total_scenes: scenes.len(),
            scenes: scenes
                .iter()
                .map(|s| SceneRecord {
                    id: s.scene.id,
                    start: s.scene.start,
                    end: s.scene.end,
                    timestamp: scene_timestamp(s),
                    screenshot: s.screenshot.clone(),
                    description: s.visual_description.clone(),
                    dialogue: s.dialogue.clone(),
                })
                .collect(),
        }
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("[PIPELINE] Analysis saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::aligner::SceneInterval;

    fn scene(id: u32, start: f64, end: f64, dialogue: &str) -> AlignedScene {
        AlignedScene {
            scene: SceneInterval::new(id, start, end),
            visual_description: None,
            screenshot: None,
            dialogue: dialogue.to_string(),
        }
    }

    #[test]
    fn test_blank_rows_are_ignored() {
        let lines = parse_script("  first line \n\n   \nsecond line\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].raw_text, "first line");
        assert_eq!(lines[1].raw_text, "second line");
    }

    #[test]
    fn test_flatten_skips_silent_scenes() {
        let scenes = vec![scene(1, 0.0, 5.0, "hello"), scene(2, 5.0, 6.0, ""), scene(3, 6.0, 9.0, "bye")];
        let lines = flatten_scenes(&scenes);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], ScriptLine::new("bye", Some(3)));
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(0.0), "0:00");
        assert_eq!(format_timestamp(75.9), "1:15");
    }

    #[test]
    fn test_analysis_keeps_every_scene() {
        let scenes = vec![scene(1, 0.0, 5.0, "hello"), scene(2, 5.0, 65.0, "")];
        let analysis = VideoAnalysis::from_scenes(Path::new("clip.mp4"), &scenes);
        assert_eq!(analysis.total_scenes, 2);
        assert_eq!(analysis.scenes[1].timestamp, "0:05-1:05");

        let json = serde_json::to_value(&analysis).unwrap();
        assert!(json["scenes"][0].get("screenshot").is_some());
        assert_eq!(json["video"], "clip.mp4");
    }

    #[test]
    fn test_scene_script_rendering() {
        let mut s = scene(1, 0.0, 5.0, "hello there");
        s.visual_description = Some("A person waves.".into());
        let text = render_scene_script(&[s]);
        assert!(text.starts_with("[SCENE 1 | 0:00-0:05 | N/A]"));
        assert!(text.contains("Visual: A person waves."));
        assert!(text.contains("Dialogue: hello there"));
    }
}
