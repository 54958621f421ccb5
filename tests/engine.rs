//! Integration tests driving the public `Engine` API end-to-end: build,
//! persist, reload, retrieve in every mode, and synthesize answers.

use chrono::{TimeZone, Utc};
use maildex::answer::NO_RESULTS_MESSAGE;
use maildex::config::Config;
use maildex::error::EngineError;
use maildex::lexical::Filter;
use maildex::models::{ChunkKind, Direction, Document};
use maildex::retrieval::{RetrievalMode, RetrievalRequest};
use maildex::Engine;
use tempfile::TempDir;

fn doc(id: &str, subject: &str, body: &str, direction: Direction) -> Document {
    Document {
        id: id.into(),
        date: Some(Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()),
        from: "marie.durand@archives.example.org".into(),
        to: vec!["jean.petit@example.org".into()],
        cc: vec![],
        subject: subject.into(),
        body: body.into(),
        attachments: vec![],
        has_attachments: false,
        direction,
        mailbox: "mailbox_1".into(),
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::with_index_dir(tmp.path().join("index"));
    // Small deterministic encoder keeps builds fast.
    cfg.embedding.dims = 64;
    cfg
}

fn sample_corpus() -> Vec<Document> {
    vec![
        doc(
            "msg-001",
            "Réunion budget",
            "Discussion sur le budget prévisionnel",
            Direction::Received,
        ),
        doc(
            "msg-002",
            "Inventaire des fonds",
            "L'inventaire des fonds anciens avance bien",
            Direction::Sent,
        ),
        doc(
            "msg-003",
            "Sortie d'équipe",
            "Proposition de randonnée en montagne pour l'équipe",
            Direction::Received,
        ),
    ]
}

#[tokio::test]
async fn test_lexical_search_finds_exact_match() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    let req = RetrievalRequest::new("budget", RetrievalMode::Lexical, 5);
    let results = engine.retrieve(&req).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "msg-001");
    assert!(results[0].score > 0.0);
}

#[tokio::test]
async fn test_empty_corpus_retrieve_and_answer() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&[], false).await.unwrap();

    let req = RetrievalRequest::new("anything", RetrievalMode::Hybrid, 5);
    let results = engine.retrieve(&req).await.unwrap();
    assert!(results.is_empty());

    let (answer, citations) = engine.answer("anything", 5).await.unwrap();
    assert_eq!(answer, NO_RESULTS_MESSAGE);
    assert!(citations.is_empty());
}

#[tokio::test]
async fn test_browse_mode_direction_filter() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    let mut req = RetrievalRequest::new("", RetrievalMode::Lexical, 10);
    req.filters = vec![Filter::Direction(Direction::Sent)];
    let results = engine.retrieve(&req).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "msg-002");
    assert_eq!(results[0].score, maildex::lexical::BROWSE_SCORE);
}

#[tokio::test]
async fn test_long_body_chunked_within_limit() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();

    let body = "inventaire ".repeat(182); // just over 2,000 characters
    assert!(body.chars().count() >= 2000);
    let corpus = vec![doc("msg-long", "", &body, Direction::Sent)];

    let snapshot = engine.ensure_ready(&corpus, false).await.unwrap();
    let body_chunks: Vec<_> = snapshot
        .chunks
        .values()
        .filter(|c| c.kind == ChunkKind::Body)
        .collect();

    assert!(body_chunks.len() >= 4, "got {} chunks", body_chunks.len());
    for chunk in body_chunks {
        assert!(chunk.text.chars().count() <= 512);
        assert_eq!(chunk.document_id, "msg-long");
    }
}

#[tokio::test]
async fn test_ensure_ready_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    let corpus = sample_corpus();

    let first = engine.ensure_ready(&corpus, false).await.unwrap();
    let second = engine.ensure_ready(&corpus, false).await.unwrap();

    assert_eq!(first.meta.fingerprint, second.meta.fingerprint);
    // Same build id means the second call did not re-run the build.
    assert_eq!(first.meta.build_id, second.meta.build_id);
}

#[tokio::test]
async fn test_snapshot_reused_across_engine_restarts() {
    let tmp = TempDir::new().unwrap();
    let corpus = sample_corpus();

    let first_build_id;
    let first_results;
    {
        let engine = Engine::new(test_config(&tmp)).unwrap();
        let snap = engine.ensure_ready(&corpus, false).await.unwrap();
        first_build_id = snap.meta.build_id.clone();

        let req = RetrievalRequest::new("budget", RetrievalMode::Hybrid, 5);
        first_results = engine.retrieve(&req).await.unwrap();
    }

    // A fresh engine over the same index directory loads the persisted
    // snapshot instead of rebuilding.
    let engine = Engine::new(test_config(&tmp)).unwrap();
    let snap = engine.ensure_ready(&corpus, false).await.unwrap();
    assert_eq!(snap.meta.build_id, first_build_id);

    let req = RetrievalRequest::new("budget", RetrievalMode::Hybrid, 5);
    let results = engine.retrieve(&req).await.unwrap();

    assert_eq!(results.len(), first_results.len());
    for (a, b) in results.iter().zip(first_results.iter()) {
        assert_eq!(a.document_id, b.document_id);
        assert!((a.score - b.score).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_forced_rebuild_runs_again() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    let corpus = sample_corpus();

    let first = engine.ensure_ready(&corpus, false).await.unwrap();
    let rebuilt = engine.ensure_ready(&corpus, true).await.unwrap();

    assert_eq!(first.meta.fingerprint, rebuilt.meta.fingerprint);
    assert_ne!(first.meta.build_id, rebuilt.meta.build_id);
}

#[tokio::test]
async fn test_model_change_invalidates_snapshot() {
    let tmp = TempDir::new().unwrap();
    let corpus = sample_corpus();

    let engine = Engine::new(test_config(&tmp)).unwrap();
    let old = engine.ensure_ready(&corpus, false).await.unwrap();

    // A different dimensionality is a different encoder model identifier.
    let mut cfg = test_config(&tmp);
    cfg.embedding.dims = 128;
    let engine = Engine::new(cfg).unwrap();
    let new = engine.ensure_ready(&corpus, false).await.unwrap();

    assert_ne!(old.meta.fingerprint, new.meta.fingerprint);
    assert_eq!(new.meta.dims, 128);

    // Post-rebuild semantic search runs in the new vector space only.
    let req = RetrievalRequest::new("budget", RetrievalMode::Semantic, 5);
    let results = engine.retrieve(&req).await.unwrap();
    for candidate in &results {
        let chunk_id = candidate.chunk_id.as_ref().unwrap();
        assert!(new.chunks.contains_key(chunk_id));
    }
}

#[tokio::test]
async fn test_answer_is_grounded_in_citations() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    let (answer, citations) = engine.answer("budget prévisionnel", 5).await.unwrap();

    assert!(!citations.is_empty());
    for i in 1..=citations.len() {
        assert!(answer.contains(&format!("[{}]", i)));
    }
    assert!(citations[0].contains("From: marie.durand@archives.example.org"));
}

#[tokio::test]
async fn test_retrieve_before_build_is_index_unavailable() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();

    let req = RetrievalRequest::new("budget", RetrievalMode::Lexical, 5);
    let err = engine.retrieve(&req).await.unwrap_err();
    assert!(matches!(err, EngineError::IndexUnavailable));
}

#[tokio::test]
async fn test_top_k_validation() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    let req = RetrievalRequest::new("budget", RetrievalMode::Hybrid, -1);
    let err = engine.retrieve(&req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_hybrid_without_semantic_capability() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.embedding.provider = "disabled".into();

    let engine = Engine::new(cfg).unwrap();
    assert!(!engine.semantic_enabled());
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    // Hybrid degrades to lexical-only instead of failing.
    let req = RetrievalRequest::new("budget", RetrievalMode::Hybrid, 5);
    let results = engine.retrieve(&req).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, "msg-001");

    // Pure semantic mode surfaces the missing capability.
    let req = RetrievalRequest::new("budget", RetrievalMode::Semantic, 5);
    let err = engine.retrieve(&req).await.unwrap_err();
    assert!(matches!(err, EngineError::ModelUnavailable(_)));
}

#[tokio::test]
async fn test_semantic_search_prefers_overlapping_content() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&tmp)).unwrap();
    engine.ensure_ready(&sample_corpus(), false).await.unwrap();

    let req = RetrievalRequest::new("budget prévisionnel", RetrievalMode::Semantic, 3);
    let results = engine.retrieve(&req).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, "msg-001");
}
