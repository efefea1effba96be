// SYNOID Repurpose - External Service Seams
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Every model-backed or process-backed collaborator sits behind one of these traits so the
// pipeline can run against the HTTP bridge in production and scripted fakes in tests.

use std::path::Path;

use async_trait::async_trait;

use crate::agent::aligner::SceneInterval;
use crate::agent::transcription::Transcript;
use crate::error::{PipelineResult, ServiceError};

/// A single prompt for the judgment/rewrite model.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgmentRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

impl JudgmentRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature,
        }
    }
}

/// Text-in/text-out chat completion used for both classification and rewriting.
#[async_trait]
pub trait JudgmentService: Send + Sync {
    async fn complete(&self, request: &JudgmentRequest) -> Result<String, ServiceError>;
}

/// Fixed-dimension text embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Identifies the embedding space; snapshots built under another model are not reused.
    fn model_id(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

/// Describes a single JPEG frame in one or two sentences.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn describe_frame(&self, jpeg: &[u8]) -> Result<String, ServiceError>;
}

/// Speech-to-text over an extracted audio track.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ServiceError>;
}

/// Shot-change detection plus the frame/audio extraction the video flow needs.
#[async_trait]
pub trait SceneDetector: Send + Sync {
    async fn detect(&self, video: &Path) -> PipelineResult<Vec<SceneInterval>>;

    async fn extract_frame(&self, video: &Path, at: f64, output: &Path) -> PipelineResult<()>;

    async fn extract_audio(&self, video: &Path, output: &Path) -> PipelineResult<()>;
}
