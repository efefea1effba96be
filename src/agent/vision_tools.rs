// SYNOID Vision Tools
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// FFmpeg-backed shot detection plus the frame and audio extraction the video flow needs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::agent::aligner::SceneInterval;
use crate::agent::services::SceneDetector;
use crate::error::{PipelineError, PipelineResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FfmpegSceneDetector {
    threshold: f64,
    min_scene_len: f64,
}

impl FfmpegSceneDetector {
    pub fn new(threshold: f64, min_scene_len: f64) -> Self {
        Self {
            threshold,
            min_scene_len,
        }
    }
}

#[async_trait]
impl SceneDetector for FfmpegSceneDetector {
    async fn detect(&self, video: &Path) -> PipelineResult<Vec<SceneInterval>> {
        info!(
            "[EYES] Detecting scenes in {:?} (threshold: {})",
            video, self.threshold
        );

        let total_duration = get_video_duration(video).await?;
        if total_duration <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "could not determine duration of {:?}",
                video
            )));
        }
        info!("[EYES] Video duration: {:.2}s", total_duration);

        let output = Command::new("ffmpeg")
            .arg("-i")
            .arg(video)
            .args([
                "-vf",
                &format!("select='gt(scene,{})',showinfo", self.threshold),
                "-f",
                "null",
                "-",
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "ffmpeg scene detection failed: {}",
                    String::from_utf8_lossy(&output.stderr).lines().last().unwrap_or("")
                ),
            )));
        }

        let cuts = parse_showinfo_cuts(&String::from_utf8_lossy(&output.stderr));
        let scenes = cuts_to_scenes(&cuts, total_duration, self.min_scene_len);
        if cuts.is_empty() {
            warn!("[EYES] No cuts detected, treating the whole video as one scene");
        }
        info!("[EYES] Detected {} scenes", scenes.len());
        Ok(scenes)
    }

    async fn extract_frame(&self, video: &Path, at: f64, output: &Path) -> PipelineResult<()> {
        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let status = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-ss", &format!("{:.3}", at), "-i"])
            .arg(video)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output)
            .status()
            .await?;
        if !status.success() {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("ffmpeg could not grab frame at {:.2}s", at),
            )));
        }
        Ok(())
    }

    async fn extract_audio(&self, video: &Path, output: &Path) -> PipelineResult<()> {
        info!("[EAR] Extracting mono 16 kHz audio track -> {:?}", output);
        let status = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-i"])
            .arg(video)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "64k"])
            .arg(output)
            .status()
            .await?;
        if !status.success() {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "ffmpeg audio extraction failed",
            )));
        }
        Ok(())
    }
}

/// Get video duration using ffprobe with a timeout
pub async fn get_video_duration(path: &Path) -> PipelineResult<f64> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new("ffprobe")
            .kill_on_drop(true)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output(),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "ffprobe duration check timed out"))??;

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| PipelineError::Validation(format!("ffprobe returned no duration for {:?}", path)))
}

/// Pull cut timestamps out of ffmpeg `showinfo` stderr.
pub fn parse_showinfo_cuts(stderr: &str) -> Vec<f64> {
    let mut cuts: Vec<f64> = stderr
        .lines()
        .filter(|line| line.contains("showinfo"))
        .filter_map(|line| {
            let rest = &line[line.find("pts_time:")? + "pts_time:".len()..];
            rest.split_whitespace().next()?.parse::<f64>().ok()
        })
        .filter(|ts| ts.is_finite() && *ts > 0.0)
        .collect();
    cuts.sort_by(f64::total_cmp);
    cuts.dedup();
    cuts
}

/// Turn cut points into contiguous 1-based scenes covering `[0, total]`.
///
/// A cut closer than `min_len` to the previous boundary is dropped, merging the sliver into
/// its neighbour; a too-short tail is folded into the last scene.
pub fn cuts_to_scenes(cuts: &[f64], total: f64, min_len: f64) -> Vec<SceneInterval> {
    let mut boundaries = vec![0.0];
    for &cut in cuts {
        let last = boundaries[boundaries.len() - 1];
        if cut >= total {
            break;
        }
        if cut - last >= min_len {
            boundaries.push(cut);
        }
    }
    if boundaries.len() > 1 && total - boundaries[boundaries.len() - 1] < min_len {
        boundaries.pop();
    }
    boundaries.push(total);

    boundaries
        .windows(2)
        .enumerate()
        .map(|(i, w)| SceneInterval::new(i as u32 + 1, w[0], w[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_showinfo() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x1] n:   0 pts:  12800 pts_time:5.0     duration: 512
frame=  10 fps=0.0 q=-0.0 size=N/A
[Parsed_showinfo_1 @ 0x1] n:   1 pts:  30720 pts_time:12      duration: 512
[Parsed_showinfo_1 @ 0x1] n:   2 pts:  30720 pts_time:12      duration: 512";
        assert_eq!(parse_showinfo_cuts(stderr), vec![5.0, 12.0]);
    }

    #[test]
    fn test_no_cuts_is_single_scene() {
        let scenes = cuts_to_scenes(&[], 30.0, 0.5);
        assert_eq!(scenes, vec![SceneInterval::new(1, 0.0, 30.0)]);
    }

    #[test]
    fn test_slivers_are_merged() {
        let scenes = cuts_to_scenes(&[5.0, 5.2, 12.0, 19.8], 20.0, 0.5);
        let bounds: Vec<(f64, f64)> = scenes.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0.0, 5.0), (5.0, 12.0), (12.0, 20.0)]);
        assert_eq!(scenes[2].id, 3);
    }
}
