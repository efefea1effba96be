// SYNOID Repurpose - Runtime Configuration
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CONFIG_FILE: &str = "personalizer.json";
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Bounded exponential backoff for external calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalizerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,

    pub chat_model: String,
    pub temperature: f32,
    pub vision_model: String,
    pub vision_max_tokens: u32,
    pub embedding_model: String,
    pub transcription_model: String,
    pub request_timeout_secs: u64,

    pub scene_threshold: f64,
    pub min_scene_len: f64,
    pub screenshots_dir: PathBuf,

    pub max_concurrency: usize,
    pub retry: RetryPolicy,

    pub index_path: PathBuf,
    pub reuse_index: bool,

    pub persona_name: String,
    pub require_grounding: bool,
    pub grounding_retries: u32,
}

impl Default for PersonalizerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 60,
            top_k: 4,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            vision_model: "gpt-4o".to_string(),
            vision_max_tokens: 150,
            embedding_model: "text-embedding-3-small".to_string(),
            transcription_model: "whisper-1".to_string(),
            request_timeout_secs: 60,
            scene_threshold: 0.3,
            min_scene_len: 0.5,
            screenshots_dir: PathBuf::from("screenshots"),
            max_concurrency: 4,
            retry: RetryPolicy::default(),
            index_path: PathBuf::from("personality_index.json"),
            reuse_index: true,
            persona_name: "the creator".to_string(),
            require_grounding: true,
            grounding_retries: 1,
        }
    }
}

impl PersonalizerConfig {
    /// Load from a JSON file, falling back to defaults when the file does not exist.
    /// A file that exists but does not parse is a config error rather than a silent default.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            let parsed: Self = serde_json::from_str(&content).map_err(|e| {
                PipelineError::Config(format!("{} is not a valid config: {}", path.display(), e))
            })?;
            info!("[CONFIG] Loaded personalizer config from {:?}", path);
            parsed
        } else {
            info!("[CONFIG] {:?} not found, using defaults", path);
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(PipelineError::Config("top_k must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(PipelineError::Config("max_concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(PipelineError::Config(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if !self.scene_threshold.is_finite() || self.scene_threshold <= 0.0 {
            return Err(PipelineError::Config("scene_threshold must be a positive number".into()));
        }
        if !self.min_scene_len.is_finite() || self.min_scene_len < 0.0 {
            return Err(PipelineError::Config("min_scene_len must be non-negative".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PersonalizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let config = PersonalizerConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let config = PersonalizerConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let path = std::env::temp_dir().join("synoid_repurpose_partial_config.json");
        fs::write(&path, r#"{ "top_k": 2, "retry": { "max_attempts": 2 } }"#).unwrap();

        let config = PersonalizerConfig::load(&path).unwrap();
        assert_eq!(config.top_k, 2);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.chunk_size, 400);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let path = std::env::temp_dir().join("synoid_repurpose_bad_config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PersonalizerConfig::load(&path), Err(PipelineError::Config(_))));
        let _ = fs::remove_file(&path);
    }
}
