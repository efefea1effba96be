// SYNOID Repurpose - Test Fakes
// Copyright (c) 2026 Xing_The_Creator | SYNOID

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use synoid_repurpose::agent::aligner::SceneInterval;
use synoid_repurpose::agent::services::{
    EmbeddingService, JudgmentRequest, JudgmentService, SceneDetector, Transcriber, VisionService,
};
use synoid_repurpose::agent::transcription::{Transcript, TranscriptToken};
use synoid_repurpose::config::{PersonalizerConfig, RetryPolicy};
use synoid_repurpose::error::{PipelineResult, ServiceError};

const DIMS: usize = 64;

/// Bag-of-words embedder: texts sharing words land close together.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let mut h = DefaultHasher::new();
        word.hash(&mut h);
        v[(h.finish() % DIMS as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingService for BagOfWordsEmbedder {
    fn model_id(&self) -> &str {
        "bag-of-words-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_words(t)).collect())
    }
}

type Responder = Box<dyn Fn(&JudgmentRequest, usize) -> Result<String, ServiceError> + Send + Sync>;

/// Judgment fake answering from a closure; `n` counts calls of the same kind (classify or
/// rewrite) so far.
pub struct ScriptedJudge {
    pub requests: Mutex<Vec<JudgmentRequest>>,
    classify_calls: AtomicUsize,
    rewrite_calls: AtomicUsize,
    classify: Responder,
    rewrite: Responder,
    delay: Option<Duration>,
}

impl ScriptedJudge {
    pub fn new<C, R>(classify: C, rewrite: R) -> Self
    where
        C: Fn(&JudgmentRequest, usize) -> Result<String, ServiceError> + Send + Sync + 'static,
        R: Fn(&JudgmentRequest, usize) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            requests: Mutex::new(Vec::new()),
            classify_calls: AtomicUsize::new(0),
            rewrite_calls: AtomicUsize::new(0),
            classify: Box::new(classify),
            rewrite: Box::new(rewrite),
            delay: None,
        }
    }

    /// Judge whose rewrites always return `answer`.
    pub fn rewriting_to(answer: &str) -> Self {
        let answer = answer.to_string();
        Self::new(
            |_, _| Err(ServiceError::Unavailable("no classifier in this test".into())),
            move |_, _| Ok(answer.clone()),
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn rewrite_calls(&self) -> usize {
        self.rewrite_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn rewrite_requests(&self) -> Vec<JudgmentRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !is_classification(r))
            .cloned()
            .collect()
    }
}

pub fn is_classification(request: &JudgmentRequest) -> bool {
    request.system.contains("classify")
}

#[async_trait]
impl JudgmentService for ScriptedJudge {
    async fn complete(&self, request: &JudgmentRequest) -> Result<String, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if is_classification(request) {
            let n = self.classify_calls.fetch_add(1, Ordering::SeqCst);
            (self.classify)(request, n)
        } else {
            let n = self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
            (self.rewrite)(request, n)
        }
    }
}

/// Detector returning fixed scenes and writing placeholder frame/audio files.
pub struct FixedScenes(pub Vec<SceneInterval>);

#[async_trait]
impl SceneDetector for FixedScenes {
    async fn detect(&self, _video: &Path) -> PipelineResult<Vec<SceneInterval>> {
        Ok(self.0.clone())
    }

    async fn extract_frame(&self, _video: &Path, _at: f64, output: &Path) -> PipelineResult<()> {
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(output, b"\xFF\xD8jpeg")?;
        Ok(())
    }

    async fn extract_audio(&self, _video: &Path, output: &Path) -> PipelineResult<()> {
        std::fs::write(output, b"mp3")?;
        Ok(())
    }
}

pub struct FixedTranscript(pub Transcript);

impl FixedTranscript {
    pub fn timed(tokens: Vec<TranscriptToken>) -> Self {
        Self(Transcript::Timed(tokens))
    }

    pub fn untimed(text: &str) -> Self {
        Self(Transcript::Untimed(text.to_string()))
    }
}

#[async_trait]
impl Transcriber for FixedTranscript {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ServiceError> {
        assert!(audio.exists(), "audio should be extracted before transcription");
        Ok(self.0.clone())
    }
}

/// Transcriber that always fails with a non-retryable error.
pub struct BrokenTranscriber;

#[async_trait]
impl Transcriber for BrokenTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<Transcript, ServiceError> {
        Err(ServiceError::Http {
            status: 400,
            message: "unsupported audio".into(),
        })
    }
}

/// Constant vector for every text, so every chunk ties with every query.
pub struct ConstantEmbedder;

#[async_trait]
impl EmbeddingService for ConstantEmbedder {
    fn model_id(&self) -> &str {
        "constant-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Judgment fake that records the most calls it ever saw in flight at once.
#[derive(Default)]
pub struct PeakTrackingJudge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl PeakTrackingJudge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JudgmentService for PeakTrackingJudge {
    async fn complete(&self, _request: &JudgmentRequest) -> Result<String, ServiceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("I build Repurpose for creators.".to_string())
    }
}

/// Describes frames in call order; calls listed in `fail_on` error out.
pub struct CountingVision {
    calls: AtomicUsize,
    pub fail_on: Vec<usize>,
}

impl CountingVision {
    pub fn new(fail_on: Vec<usize>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl VisionService for CountingVision {
    async fn describe_frame(&self, jpeg: &[u8]) -> Result<String, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&n) {
            return Err(ServiceError::Http {
                status: 400,
                message: "bad frame".into(),
            });
        }
        Ok(format!("A person talks to camera ({} bytes).", jpeg.len()))
    }
}

/// Fresh scratch directory per test.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("synoid-repurpose-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

pub fn test_config(dir: &Path) -> PersonalizerConfig {
    PersonalizerConfig {
        chunk_size: 120,
        chunk_overlap: 20,
        top_k: 2,
        max_concurrency: 3,
        retry: fast_retry(3),
        index_path: dir.join("index.json"),
        reuse_index: false,
        screenshots_dir: dir.join("screenshots"),
        persona_name: "Alex".to_string(),
        ..PersonalizerConfig::default()
    }
}

pub const PERSONALITY: &str = "I am Alex. I spent two years building Repurpose, an app that turns \
long videos into short scripts. Before that I worked as a barista in Lisbon and taught myself to code at night. \
Repurpose now has 3,000 creators using it every week. I believe shipping small things every day beats planning.";
