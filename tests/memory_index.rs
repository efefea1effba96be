mod common;

use std::sync::Arc;

use common::{fast_retry, scratch_dir, BagOfWordsEmbedder, ConstantEmbedder, PERSONALITY};
use synoid_repurpose::agent::memory_index::{chunk_text, MemoryIndex};
use synoid_repurpose::error::PipelineError;

#[tokio::test]
async fn test_retrieval_is_deterministic_and_ranked() {
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let index = MemoryIndex::build(PERSONALITY, 120, 20, embedder.clone(), fast_retry(2))
        .await
        .unwrap();
    assert!(index.len() > 1);

    let first = index.retrieve("building Repurpose app videos scripts", 2).await.unwrap();
    let second = index.retrieve("building Repurpose app videos scripts", 2).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert!(first.hits[0].score >= first.hits[1].score);
    assert!(first.hits[0].chunk.text.contains("Repurpose"));
}

#[tokio::test]
async fn test_top_k_larger_than_index_returns_everything() {
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let index = MemoryIndex::build("short personal note about coding", 400, 60, embedder, fast_retry(1))
        .await
        .unwrap();
    assert_eq!(index.len(), 1);
    let hits = index.retrieve("coding", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_empty_index_returns_no_context() {
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let index = MemoryIndex::empty(embedder.clone());
    let hits = index.retrieve("anything", 4).await.unwrap();
    assert!(hits.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_invalid_chunking_is_a_config_error() {
    assert!(matches!(chunk_text(PERSONALITY, 50, 50), Err(PipelineError::Config(_))));

    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let result = MemoryIndex::build(PERSONALITY, 50, 80, embedder, fast_retry(1)).await;
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[tokio::test]
async fn test_chunks_overlap_and_cover_the_source() {
    let windows = chunk_text(PERSONALITY, 100, 25).unwrap();
    assert!(windows.len() > 2);
    assert_eq!(windows[0].0, 0);
    assert_eq!(windows[1].0, 75);
    let last = windows.last().unwrap();
    assert!(PERSONALITY.ends_with(last.1.as_str()));
}

#[tokio::test]
async fn test_snapshot_is_reused_until_source_changes() {
    let dir = scratch_dir("snapshot-reuse");
    let path = dir.join("index.json");
    let embedder = Arc::new(BagOfWordsEmbedder::default());

    let built = MemoryIndex::load_or_build(&path, PERSONALITY, 120, 20, embedder.clone(), fast_retry(1))
        .await
        .unwrap();
    let calls_after_build = embedder.calls();
    assert!(calls_after_build > 0);
    assert!(path.exists());

    let reused = MemoryIndex::load_or_build(&path, PERSONALITY, 120, 20, embedder.clone(), fast_retry(1))
        .await
        .unwrap();
    assert_eq!(embedder.calls(), calls_after_build);
    assert_eq!(reused.chunks(), built.chunks());
    assert_eq!(reused.fingerprint(), built.fingerprint());

    let changed = format!("{} I also run a newsletter.", PERSONALITY);
    let rebuilt = MemoryIndex::load_or_build(&path, &changed, 120, 20, embedder.clone(), fast_retry(1))
        .await
        .unwrap();
    assert!(embedder.calls() > calls_after_build);
    assert_ne!(rebuilt.fingerprint(), built.fingerprint());
}

#[tokio::test]
async fn test_empty_source_is_rejected() {
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let result = MemoryIndex::build("   ", 120, 20, embedder, fast_retry(1)).await;
    assert!(matches!(result, Err(PipelineError::Validation(_))));
}

#[tokio::test]
async fn test_tied_scores_keep_chunk_order() {
    let index = MemoryIndex::build("aaaaabbbbbcccccddddd", 5, 0, Arc::new(ConstantEmbedder), fast_retry(1))
        .await
        .unwrap();
    assert_eq!(index.len(), 4);

    let hits = index.retrieve("anything at all", 3).await.unwrap();
    let offsets: Vec<usize> = hits.hits.iter().map(|h| h.chunk.source_offset).collect();
    assert_eq!(offsets, vec![0, 5, 10]);
    assert!(hits.hits.windows(2).all(|w| w[0].score == w[1].score));

    let all = index.retrieve("anything at all", 10).await.unwrap();
    let offsets: Vec<usize> = all.hits.iter().map(|h| h.chunk.source_offset).collect();
    assert_eq!(offsets, vec![0, 5, 10, 15]);
}

#[tokio::test]
async fn test_unwritable_snapshot_does_not_fail_the_build() {
    let dir = scratch_dir("snapshot-unwritable");
    // A regular file where the snapshot directory should be.
    let blocker = dir.join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let path = blocker.join("index.json");

    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let index = MemoryIndex::load_or_build(&path, PERSONALITY, 120, 20, embedder, fast_retry(1))
        .await
        .unwrap();
    assert!(!index.is_empty());
    assert!(!path.exists());
}
