// SYNOID Repurpose - Personal Memory Index
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Session-scoped vector store over the personality source text. Built once per run, then
// shared read-only by every retrieval worker.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::agent::retry::with_backoff;
use crate::agent::services::EmbeddingService;
use crate::config::RetryPolicy;
use crate::error::{PipelineError, PipelineResult, ServiceError};

const SNAPSHOT_VERSION: u32 = 1;
/// Chunks are embedded in batches to keep request bodies bounded.
const EMBED_BATCH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    /// Character offset of the window start in the source text.
    pub source_offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: MemoryChunk,
    pub score: f64,
}

/// Ranked hits for one query, best first. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.chunk.text.as_str())
    }

    /// Drop hits whose trimmed text repeats an earlier hit.
    pub fn dedup(mut self) -> Self {
        let mut seen: Vec<String> = Vec::new();
        self.hits.retain(|h| {
            let key = h.chunk.text.trim().to_string();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
        self
    }

    /// Context block handed to the rewriter.
    pub fn joined(&self) -> String {
        self.texts().map(str::trim).collect::<Vec<_>>().join(" | ")
    }
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    fingerprint: String,
    chunk_size: usize,
    chunk_overlap: usize,
    chunks: Vec<MemoryChunk>,
}

pub struct MemoryIndex {
    chunks: Vec<MemoryChunk>,
    embedder: Arc<dyn EmbeddingService>,
    retry: RetryPolicy,
    fingerprint: String,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("chunks", &self.chunks.len())
            .field("embedding_model", &self.embedder.model_id())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl MemoryIndex {
    /// An index with nothing in it. Every retrieval comes back empty.
    pub fn empty(embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            chunks: Vec::new(),
            embedder,
            retry: RetryPolicy::default(),
            fingerprint: String::new(),
        }
    }

    /// Split `source_text` into overlapping character windows, embed and store them.
    pub async fn build(
        source_text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
        embedder: Arc<dyn EmbeddingService>,
        retry: RetryPolicy,
    ) -> PipelineResult<Self> {
        let windows = chunk_text(source_text, chunk_size, chunk_overlap)?;
        if windows.is_empty() {
            return Err(PipelineError::Validation(
                "personality source text is empty".to_string(),
            ));
        }

        info!(
            "[INDEX] Embedding {} chunks (size {}, overlap {}) with {}",
            windows.len(),
            chunk_size,
            chunk_overlap,
            embedder.model_id()
        );

        let mut chunks = Vec::with_capacity(windows.len());
        for batch in windows.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = with_backoff(&retry, "embed chunks", || embedder.embed(&texts)).await?;
            if vectors.len() != texts.len() {
                return Err(ServiceError::InvalidResponse(format!(
                    "asked for {} embeddings, got {}",
                    texts.len(),
                    vectors.len()
                ))
                .into());
            }
            for ((offset, text), embedding) in batch.iter().zip(vectors) {
                chunks.push(MemoryChunk {
                    text: text.clone(),
                    embedding,
                    source_offset: *offset,
                });
            }
        }

        let fingerprint = fingerprint(source_text, chunk_size, chunk_overlap, embedder.model_id());
        info!("[INDEX] Personality index ready: {} chunks", chunks.len());
        Ok(Self {
            chunks,
            embedder,
            retry,
            fingerprint,
        })
    }

    /// Reuse the snapshot at `path` when it was built from the same inputs, otherwise rebuild
    /// and overwrite it.
    pub async fn load_or_build(
        path: &Path,
        source_text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
        embedder: Arc<dyn EmbeddingService>,
        retry: RetryPolicy,
    ) -> PipelineResult<Self> {
        let expected = fingerprint(source_text, chunk_size, chunk_overlap, embedder.model_id());
        match Self::load(path, &expected, embedder.clone(), retry.clone()) {
            Ok(Some(index)) => return Ok(index),
            Ok(None) => {}
            Err(e) => warn!("[INDEX] Ignoring unreadable snapshot {:?}: {}", path, e),
        }

        let index = Self::build(source_text, chunk_size, chunk_overlap, embedder, retry).await?;
        if let Err(e) = index.save(path, chunk_size, chunk_overlap) {
            warn!("[INDEX] Could not save snapshot {:?}, continuing without it: {}", path, e);
        }
        Ok(index)
    }

    /// Returns `Ok(None)` when there is no snapshot or it was built from different inputs.
    pub fn load(
        path: &Path,
        expected_fingerprint: &str,
        embedder: Arc<dyn EmbeddingService>,
        retry: RetryPolicy,
    ) -> PipelineResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let snapshot: IndexSnapshot = serde_json::from_str(&fs::read_to_string(path)?)?;
        if snapshot.version != SNAPSHOT_VERSION || snapshot.fingerprint != expected_fingerprint {
            info!("[INDEX] Snapshot {:?} is stale, rebuilding", path);
            return Ok(None);
        }
        info!(
            "[INDEX] Reusing snapshot {:?} ({} chunks)",
            path,
            snapshot.chunks.len()
        );
        Ok(Some(Self {
            chunks: snapshot.chunks,
            embedder,
            retry,
            fingerprint: snapshot.fingerprint,
        }))
    }

    pub fn save(&self, path: &Path, chunk_size: usize, chunk_overlap: usize) -> PipelineResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            fingerprint: self.fingerprint.clone(),
            chunk_size,
            chunk_overlap,
            chunks: self.chunks.clone(),
        };
        fs::write(path, serde_json::to_string(&snapshot)?)?;
        info!("[INDEX] 💾 Snapshot saved: {:?}", path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[MemoryChunk] {
        &self.chunks
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Embed `query` and return the `top_k` nearest chunks.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult, ServiceError> {
        if top_k == 0 || self.chunks.is_empty() {
            return Ok(RetrievalResult::default());
        }
        let texts = vec![query.to_string()];
        let mut vectors = with_backoff(&self.retry, "embed query", || self.embedder.embed(&texts)).await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| ServiceError::InvalidResponse("empty query embedding".to_string()))?;
        Ok(self.retrieve_by_vector(&query_vector, top_k))
    }

    /// Cosine ranking, best first; ties keep chunk order.
    pub fn retrieve_by_vector(&self, query_vector: &[f32], top_k: usize) -> RetrievalResult {
        if top_k == 0 {
            return RetrievalResult::default();
        }
        let mut hits: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| cosine_similarity(query_vector, &c.embedding).map(|s| (i, s)))
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(top_k);

        RetrievalResult {
            hits: hits
                .into_iter()
                .map(|(i, score)| ScoredChunk {
                    chunk: self.chunks[i].clone(),
                    score,
                })
                .collect(),
        }
    }
}

/// Fixed-size character windows sharing `chunk_overlap` characters with their neighbour.
///
/// Returns `(char_offset, trimmed_text)` pairs; whitespace-only windows are skipped.
pub fn chunk_text(
    source: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> PipelineResult<Vec<(usize, String)>> {
    if chunk_size == 0 {
        return Err(PipelineError::Config("chunk_size must be positive".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(PipelineError::Config(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap, chunk_size
        )));
    }

    let chars: Vec<char> = source.chars().collect();
    let step = chunk_size - chunk_overlap;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            windows.push((start, trimmed.to_string()));
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    Ok(windows)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

fn fingerprint(source: &str, chunk_size: usize, chunk_overlap: usize, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(chunk_size.to_le_bytes());
    hasher.update(chunk_overlap.to_le_bytes());
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_share_overlap() {
        let windows = chunk_text("abcdefghij", 4, 1).unwrap();
        let texts: Vec<&str> = windows.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        let offsets: Vec<usize> = windows.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 3, 6]);
    }

    #[test]
    fn test_windows_count_chars_not_bytes() {
        let windows = chunk_text("ééééé", 2, 0).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].1, "é");
    }

    #[test]
    fn test_overlap_equal_to_size_is_config_error() {
        assert!(matches!(chunk_text("abc", 3, 3), Err(PipelineError::Config(_))));
        assert!(matches!(chunk_text("abc", 0, 0), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        let s = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let hit = |text: &str, score: f64| ScoredChunk {
            chunk: MemoryChunk {
                text: text.to_string(),
                embedding: vec![],
                source_offset: 0,
            },
            score,
        };
        let result = RetrievalResult {
            hits: vec![hit("a", 0.9), hit(" a ", 0.8), hit("b", 0.7)],
        }
        .dedup();
        assert_eq!(result.joined(), "a | b");
    }
}
