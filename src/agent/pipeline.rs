// SYNOID Repurpose - Pipeline Orchestrator
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Sequences the two flows (video -> script -> personalized script, script -> personalized
// script) over a session-scoped `PipelineRun`. Per-line work fans out over a bounded worker
// pool; results are slotted back by input index so output order always matches input order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::agent::aligner::{align, validate_scenes, AlignedScene, SceneInterval};
use crate::agent::classifier::{Classification, JudgmentClassifier, LineClassifier, LinePosition, RuleBasedClassifier};
use crate::agent::memory_index::{MemoryIndex, RetrievalResult};
use crate::agent::query_builder::RetrievalQueryBuilder;
use crate::agent::retry::with_backoff;
use crate::agent::rewriter::{GroundedRewriter, RewriteOptions, RewriteOutcome, RewrittenLine};
use crate::agent::script::{flatten_scenes, parse_script, ScriptLine};
use crate::agent::services::{EmbeddingService, JudgmentService, SceneDetector, Transcriber, VisionService};
use crate::agent::transcription::TranscriptToken;
use crate::config::PersonalizerConfig;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStage {
    #[default]
    Init,
    IndexReady,
    Aligned,
    Classified,
    Retrieved,
    Rewritten,
    Done,
}

impl RunStage {
    fn can_advance_to(self, next: RunStage) -> bool {
        use RunStage::*;
        matches!(
            (self, next),
            (Init, IndexReady)
                | (IndexReady, Aligned)
                | (IndexReady, Classified)
                | (Aligned, Classified)
                | (Classified, Retrieved)
                | (Retrieved, Rewritten)
                | (Rewritten, Done)
                // Regeneration re-enters the personalization flow.
                | (Done, Classified)
        )
    }
}

/// Sender side of a run's cancellation flag.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Outcome of one fanned-out work item.
#[derive(Debug)]
enum Slot<R> {
    Done(R),
    Cancelled,
    Panicked(String),
}

/// Run `work` over `items` with at most `limit` in flight. Results come back in input order.
async fn fan_out<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancel: &CancelSignal,
    label: &'static str,
    work: F,
) -> Vec<Slot<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let work = Arc::new(work);
    let mut handles = Vec::with_capacity(items.len());

    for (i, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let work = work.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                permit = semaphore.acquire_owned() => permit.ok()?,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = (*work)(i, item) => Some(result),
            }
        }));
    }

    let mut slots = Vec::with_capacity(handles.len());
    for (i, handle) in handles.into_iter().enumerate() {
        slots.push(match handle.await {
            Ok(Some(result)) => Slot::Done(result),
            Ok(None) => Slot::Cancelled,
            Err(e) => {
                error!("[PIPELINE] {} task {} panicked: {}", label, i + 1, e);
                Slot::Panicked(e.to_string())
            }
        });
    }
    slots
}

/// Context gathered for one line, or why there is none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    pub query: Option<String>,
    pub context: RetrievalResult,
    pub error: Option<String>,
}

async fn remove_work_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[PIPELINE] Could not remove {:?}: {}", path, e),
    }
}

/// Everything one pipeline run owns. Artifacts of completed stages stay readable after a
/// later stage fails or the run is cancelled.
#[derive(Debug, Default)]
pub struct PipelineRun {
    stage: RunStage,
    index: Option<Arc<MemoryIndex>>,
    scenes: Vec<AlignedScene>,
    lines: Vec<ScriptLine>,
    classifications: Vec<Classification>,
    retrievals: Vec<RetrievalOutcome>,
    rewritten: Vec<Option<RewrittenLine>>,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn index(&self) -> Option<&Arc<MemoryIndex>> {
        self.index.as_ref()
    }

    pub fn scenes(&self) -> &[AlignedScene] {
        &self.scenes
    }

    pub fn lines(&self) -> &[ScriptLine] {
        &self.lines
    }

    pub fn classifications(&self) -> &[Classification] {
        &self.classifications
    }

    pub fn retrievals(&self) -> &[RetrievalOutcome] {
        &self.retrievals
    }

    /// `None` marks a line whose rewrite was cancelled.
    pub fn rewritten(&self) -> &[Option<RewrittenLine>] {
        &self.rewritten
    }

    fn advance(&mut self, next: RunStage) -> PipelineResult<()> {
        if !self.stage.can_advance_to(next) {
            return Err(PipelineError::Stage {
                from: self.stage,
                to: next,
            });
        }
        info!("[PIPELINE] Stage {:?} -> {:?}", self.stage, next);
        self.stage = next;
        Ok(())
    }
}

/// Final personalized script plus per-outcome counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalizedScript {
    pub lines: Vec<RewrittenLine>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rewritten: usize,
    pub filler: usize,
    pub ungrounded: usize,
    pub failed: usize,
}

impl PersonalizedScript {
    /// One output line per input line, same order.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.output_text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for line in &self.lines {
            match line.outcome {
                RewriteOutcome::Rewritten => summary.rewritten += 1,
                RewriteOutcome::Filler => summary.filler += 1,
                RewriteOutcome::Ungrounded => summary.ungrounded += 1,
                RewriteOutcome::ServiceFailed(_) | RewriteOutcome::GroundingFallback(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// The external collaborators a run may call. Video-only services are optional.
#[derive(Clone)]
pub struct ServiceSet {
    pub judge: Arc<dyn JudgmentService>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub vision: Option<Arc<dyn VisionService>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub detector: Option<Arc<dyn SceneDetector>>,
}

impl ServiceSet {
    pub fn new(judge: Arc<dyn JudgmentService>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            judge,
            embedder,
            vision: None,
            transcriber: None,
            detector: None,
        }
    }
}

pub struct PipelineOrchestrator {
    config: PersonalizerConfig,
    services: ServiceSet,
    classifier: Arc<dyn LineClassifier>,
    query_builder: RetrievalQueryBuilder,
    rewriter: Arc<GroundedRewriter>,
    cancel: CancelSignal,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PersonalizerConfig,
        services: ServiceSet,
        classifier: Arc<dyn LineClassifier>,
        cancel: CancelSignal,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let rewriter = Arc::new(GroundedRewriter::new(services.judge.clone(), &config));
        Ok(Self {
            query_builder: RetrievalQueryBuilder::new(&config.persona_name),
            config,
            services,
            classifier,
            rewriter,
            cancel,
        })
    }

    /// Orchestrator whose classifier consults the judgment service.
    pub fn with_judgment_classifier(
        config: PersonalizerConfig,
        services: ServiceSet,
        cancel: CancelSignal,
    ) -> PipelineResult<Self> {
        let classifier = Arc::new(JudgmentClassifier::new(
            services.judge.clone(),
            config.retry.clone(),
            &config.persona_name,
        ));
        Self::new(config, services, classifier, cancel)
    }

    pub fn config(&self) -> &PersonalizerConfig {
        &self.config
    }

    fn check_cancelled(&self, stage: RunStage) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            warn!("[PIPELINE] Run cancelled before {:?}", stage);
            return Err(PipelineError::Cancelled(stage));
        }
        Ok(())
    }

    /// Build the personality index (or reuse its snapshot) and move the run to `IndexReady`.
    pub async fn prepare_index(&self, run: &mut PipelineRun, personality: &str) -> PipelineResult<()> {
        self.check_cancelled(RunStage::IndexReady)?;
        let index = if self.config.reuse_index {
            MemoryIndex::load_or_build(
                &self.config.index_path,
                personality,
                self.config.chunk_size,
                self.config.chunk_overlap,
                self.services.embedder.clone(),
                self.config.retry.clone(),
            )
            .await?
        } else {
            MemoryIndex::build(
                personality,
                self.config.chunk_size,
                self.config.chunk_overlap,
                self.services.embedder.clone(),
                self.config.retry.clone(),
            )
            .await?
        };
        self.attach_index(run, Arc::new(index))
    }

    /// Hand an already-built index to the run.
    pub fn attach_index(&self, run: &mut PipelineRun, index: Arc<MemoryIndex>) -> PipelineResult<()> {
        run.advance(RunStage::IndexReady)?;
        run.index = Some(index);
        Ok(())
    }

    /// Script flow entry: one line per non-blank row. Returns the line count.
    pub fn load_script(&self, run: &mut PipelineRun, text: &str) -> usize {
        run.lines = parse_script(text);
        info!("[PIPELINE] Loaded {} script lines", run.lines.len());
        run.lines.len()
    }

    /// Video flow entry: detect scenes, transcribe, describe and align, then flatten the
    /// aligned dialogue into the run's script lines.
    pub async fn process_video(&self, run: &mut PipelineRun, video: &Path) -> PipelineResult<Vec<AlignedScene>> {
        if run.stage != RunStage::IndexReady {
            return Err(PipelineError::Stage {
                from: run.stage,
                to: RunStage::Aligned,
            });
        }
        let detector = self
            .services
            .detector
            .clone()
            .ok_or_else(|| PipelineError::Config("video flow needs a scene detector".into()))?;
        let transcriber = self
            .services
            .transcriber
            .clone()
            .ok_or_else(|| PipelineError::Config("video flow needs a transcriber".into()))?;

        info!("[PIPELINE] 🎥 Processing video: {:?}", video);
        let scenes = detector.detect(video).await?;
        validate_scenes(&scenes)?;
        self.check_cancelled(RunStage::Aligned)?;

        let (tokens, frames) = tokio::join!(
            self.transcribe(detector.as_ref(), transcriber.as_ref(), video, &scenes),
            self.describe_scenes(detector.clone(), video, &scenes),
        );
        let tokens = tokens?;

        let mut aligned = align(&scenes, &tokens)?;
        for (scene, (screenshot, description)) in aligned.iter_mut().zip(frames) {
            scene.screenshot = screenshot;
            scene.visual_description = description;
        }
        self.check_cancelled(RunStage::Aligned)?;

        run.scenes = aligned.clone();
        run.lines = flatten_scenes(&aligned);
        run.advance(RunStage::Aligned)?;
        info!(
            "[PIPELINE] {} scenes aligned into {} script lines",
            aligned.len(),
            run.lines.len()
        );
        Ok(aligned)
    }

    /// Extract the audio track, transcribe it and remove the extracted file either way.
    async fn transcribe(
        &self,
        detector: &dyn SceneDetector,
        transcriber: &dyn Transcriber,
        video: &Path,
        scenes: &[SceneInterval],
    ) -> PipelineResult<Vec<TranscriptToken>> {
        let work_dir = video.parent().unwrap_or(Path::new(".")).join(".synoid_work");
        tokio::fs::create_dir_all(&work_dir).await?;
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let audio = work_dir.join(format!("{}_audio.mp3", stem));

        let transcript = match detector.extract_audio(video, &audio).await {
            Ok(()) => with_backoff(&self.config.retry, "transcribe audio", || transcriber.transcribe(&audio))
                .await
                .map_err(PipelineError::from),
            Err(e) => Err(e),
        };
        remove_work_file(&audio).await;
        // Only succeeds once the work dir is empty.
        let _ = tokio::fs::remove_dir(&work_dir).await;

        let tokens = transcript?.into_tokens(scenes);
        info!("[EAR] Transcription complete: {} tokens", tokens.len());
        Ok(tokens)
    }

    /// Screenshot and describe every scene. Failures stay local to their scene.
    async fn describe_scenes(
        &self,
        detector: Arc<dyn SceneDetector>,
        video: &Path,
        scenes: &[SceneInterval],
    ) -> Vec<(Option<PathBuf>, Option<String>)> {
        let vision = self.services.vision.clone();
        let retry = self.config.retry.clone();
        let shots_dir = self.config.screenshots_dir.clone();
        let video = video.to_path_buf();

        let slots = fan_out(
            scenes.to_vec(),
            self.config.max_concurrency,
            &self.cancel,
            "describe scene",
            move |_, scene: SceneInterval| {
                let detector = detector.clone();
                let vision = vision.clone();
                let retry = retry.clone();
                let video = video.clone();
                let shot = shots_dir.join(format!("scene_{:03}.jpg", scene.id));
                async move {
                    if let Err(e) = detector.extract_frame(&video, scene.midpoint(), &shot).await {
                        warn!("[EYES] Scene {}: no screenshot ({})", scene.id, e);
                        return (None, None);
                    }
                    let Some(vision) = vision else {
                        return (Some(shot), None);
                    };
                    let jpeg = match tokio::fs::read(&shot).await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("[EYES] Scene {}: unreadable screenshot ({})", scene.id, e);
                            return (Some(shot), None);
                        }
                    };
                    match with_backoff(&retry, "describe scene", || vision.describe_frame(&jpeg)).await {
                        Ok(description) => {
                            info!("[EYES] Scene {}: {}", scene.id, description);
                            (Some(shot), Some(description))
                        }
                        Err(e) => {
                            warn!("[EYES] Scene {}: description failed ({})", scene.id, e);
                            (Some(shot), None)
                        }
                    }
                }
            },
        )
        .await;

        slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Done(frame) => frame,
                Slot::Cancelled | Slot::Panicked(_) => (None, None),
            })
            .collect()
    }

    /// Classify, retrieve and rewrite every loaded line.
    pub async fn personalize(&self, run: &mut PipelineRun, options: &RewriteOptions) -> PipelineResult<PersonalizedScript> {
        let index = match run.index.clone() {
            Some(index) if run.stage.can_advance_to(RunStage::Classified) => index,
            _ => {
                return Err(PipelineError::Stage {
                    from: run.stage,
                    to: RunStage::Classified,
                })
            }
        };

        self.check_cancelled(RunStage::Classified)?;
        run.classifications = self.classify_stage(&run.lines).await?;
        run.retrievals.clear();
        run.rewritten.clear();
        run.advance(RunStage::Classified)?;

        self.check_cancelled(RunStage::Retrieved)?;
        run.retrievals = self.retrieve_stage(&run.lines, &run.classifications, index).await?;
        run.advance(RunStage::Retrieved)?;

        self.check_cancelled(RunStage::Rewritten)?;
        let (rewritten, cancelled) = self
            .rewrite_stage(&run.lines, &run.classifications, &run.retrievals, options)
            .await;
        run.rewritten = rewritten;
        if cancelled {
            warn!("[PIPELINE] Rewrite stage cancelled, keeping completed lines only");
            return Err(PipelineError::Cancelled(RunStage::Rewritten));
        }
        run.advance(RunStage::Rewritten)?;

        let script = PersonalizedScript {
            lines: run.rewritten.iter().flatten().cloned().collect(),
        };
        run.advance(RunStage::Done)?;

        let summary = script.summary();
        info!(
            "[PIPELINE] ✅ {} lines: {} rewritten, {} filler, {} ungrounded, {} failed",
            script.lines.len(),
            summary.rewritten,
            summary.filler,
            summary.ungrounded,
            summary.failed
        );
        Ok(script)
    }

    /// Re-enter the personalization flow asking for a different grounded draft.
    pub async fn regenerate(&self, run: &mut PipelineRun, extra_instructions: Option<String>) -> PipelineResult<PersonalizedScript> {
        let options = RewriteOptions {
            extra_instructions,
            variation: Some(rand::thread_rng().gen_range(1..=u32::MAX as u64)),
        };
        info!("[PIPELINE] 🔁 Regenerating (variation {:?})", options.variation);
        self.personalize(run, &options).await
    }

    async fn classify_stage(&self, lines: &[ScriptLine]) -> PipelineResult<Vec<Classification>> {
        let total = lines.len();
        let classifier = self.classifier.clone();
        let texts: Vec<String> = lines.iter().map(|l| l.raw_text.clone()).collect();

        let slots = fan_out(
            texts.clone(),
            self.config.max_concurrency,
            &self.cancel,
            "classify",
            move |index, text: String| {
                let classifier = classifier.clone();
                async move { classifier.classify(&text, LinePosition { index, total }).await }
            },
        )
        .await;

        let rules = RuleBasedClassifier::new();
        let mut out = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Slot::Done(c) => out.push(c),
                Slot::Cancelled => return Err(PipelineError::Cancelled(RunStage::Classified)),
                Slot::Panicked(_) => out.push(Classification::new(
                    rules.classify_sync(&texts[index], LinePosition { index, total }),
                )),
            }
        }
        Ok(out)
    }

    async fn retrieve_stage(
        &self,
        lines: &[ScriptLine],
        classifications: &[Classification],
        index: Arc<MemoryIndex>,
    ) -> PipelineResult<Vec<RetrievalOutcome>> {
        let top_k = self.config.top_k;
        let queries: Vec<Option<String>> = lines
            .iter()
            .zip(classifications)
            .map(|(line, c)| self.query_builder.build_query_with_hint(line, c))
            .collect();

        let slots = fan_out(
            queries,
            self.config.max_concurrency,
            &self.cancel,
            "retrieve",
            move |_, query: Option<String>| {
                let index = index.clone();
                async move {
                    let Some(q) = query else {
                        return RetrievalOutcome::default();
                    };
                    match index.retrieve(&q, top_k).await {
                        Ok(context) => RetrievalOutcome {
                            query: Some(q),
                            context: context.dedup(),
                            error: None,
                        },
                        Err(e) => {
                            warn!("[QUERY] Retrieval failed for {:?}: {}", q, e);
                            RetrievalOutcome {
                                query: Some(q),
                                context: RetrievalResult::default(),
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
            },
        )
        .await;

        slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Done(outcome) => Ok(outcome),
                Slot::Cancelled => Err(PipelineError::Cancelled(RunStage::Retrieved)),
                Slot::Panicked(e) => Ok(RetrievalOutcome {
                    error: Some(e),
                    ..Default::default()
                }),
            })
            .collect()
    }

    /// Returns the per-line results and whether the stage was cancelled part-way.
    async fn rewrite_stage(
        &self,
        lines: &[ScriptLine],
        classifications: &[Classification],
        retrievals: &[RetrievalOutcome],
        options: &RewriteOptions,
    ) -> (Vec<Option<RewrittenLine>>, bool) {
        let items: Vec<(ScriptLine, Classification, RetrievalOutcome)> = lines
            .iter()
            .cloned()
            .zip(classifications.iter().cloned())
            .zip(retrievals.iter().cloned())
            .map(|((l, c), r)| (l, c, r))
            .collect();
        let fallbacks = items.clone();

        let rewriter = self.rewriter.clone();
        let options = options.clone();
        let slots = fan_out(
            items,
            self.config.max_concurrency,
            &self.cancel,
            "rewrite",
            move |_, (line, classification, retrieval): (ScriptLine, Classification, RetrievalOutcome)| {
                let rewriter = rewriter.clone();
                let options = options.clone();
                async move {
                    if let Some(err) = retrieval.error {
                        return RewrittenLine::pass_through(
                            &line,
                            classification.role,
                            RetrievalResult::default(),
                            RewriteOutcome::ServiceFailed(err),
                        );
                    }
                    rewriter
                        .rewrite(&line, classification.role, retrieval.context, &options)
                        .await
                }
            },
        )
        .await;

        let mut cancelled = false;
        let out = slots
            .into_iter()
            .zip(fallbacks)
            .map(|(slot, (line, classification, retrieval))| match slot {
                Slot::Done(rewritten) => Some(rewritten),
                Slot::Cancelled => {
                    cancelled = true;
                    None
                }
                Slot::Panicked(e) => Some(RewrittenLine::pass_through(
                    &line,
                    classification.role,
                    retrieval.context,
                    RewriteOutcome::ServiceFailed(e),
                )),
            })
            .collect();
        (out, cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        assert!(RunStage::Init.can_advance_to(RunStage::IndexReady));
        assert!(RunStage::IndexReady.can_advance_to(RunStage::Classified));
        assert!(RunStage::Done.can_advance_to(RunStage::Classified));
        assert!(!RunStage::Init.can_advance_to(RunStage::Classified));
        assert!(!RunStage::Classified.can_advance_to(RunStage::Rewritten));
    }

    #[tokio::test]
    async fn test_fan_out_preserves_input_order() {
        let (_handle, signal) = cancel_pair();
        let slots = fan_out(vec![30u64, 1, 15, 5], 2, &signal, "test", |i, delay| async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            i * 10
        })
        .await;
        let values: Vec<usize> = slots
            .into_iter()
            .map(|s| match s {
                Slot::Done(v) => v,
                other => panic!("unexpected slot {:?}", other),
            })
            .collect();
        assert_eq!(values, vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_fan_out_respects_cancellation() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let slots = fan_out(vec![1u8, 2], 1, &signal, "test", |_, v| async move { v }).await;
        assert!(slots.iter().all(|s| matches!(s, Slot::Cancelled)));
    }
}
