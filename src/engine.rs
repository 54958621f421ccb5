//! Engine facade tying the pipeline together.
//!
//! Construction probes the embedding capability exactly once (an injected
//! strategy, never a global toggle); retrieval and answering run against the
//! lifecycle manager's active snapshot. Callers that query before any
//! snapshot is READY get [`EngineError::IndexUnavailable`] so they can
//! trigger a build.

use std::sync::Arc;

use crate::answer::{AnswerBackend, AnswerSynthesizer};
use crate::config::Config;
use crate::embedding::{create_encoder, EmbeddingEncoder};
use crate::error::{EngineError, Result};
use crate::lifecycle::{IndexState, LifecycleManager};
use crate::models::Document;
use crate::retrieval::{self, Candidate, RetrievalMode, RetrievalRequest};
use crate::snapshot::Snapshot;

/// The hybrid retrieval and answer-synthesis engine.
pub struct Engine {
    config: Config,
    encoder: Option<Arc<dyn EmbeddingEncoder>>,
    lifecycle: LifecycleManager,
    synthesizer: AnswerSynthesizer,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let encoder = create_encoder(&config.embedding)?;
        if encoder.is_none() {
            tracing::info!("semantic capability disabled; hybrid retrieval degrades to lexical");
        }
        let synthesizer = AnswerSynthesizer::new(config.answer.max_context);
        let lifecycle = LifecycleManager::new(&config);

        Ok(Self {
            config,
            encoder,
            lifecycle,
            synthesizer,
        })
    }

    /// Swap in a different answer composition backend.
    pub fn with_answer_backend(mut self, backend: Box<dyn AnswerBackend>) -> Self {
        self.synthesizer =
            AnswerSynthesizer::with_backend(self.config.answer.max_context, backend);
        self
    }

    /// Whether semantic retrieval is available.
    pub fn semantic_enabled(&self) -> bool {
        self.encoder.is_some()
    }

    /// The snapshot fingerprint this engine would use for `corpus`.
    pub fn corpus_fingerprint(&self, corpus: &[Document]) -> String {
        let (model_id, dims) = match &self.encoder {
            Some(e) => (e.model_id().to_string(), e.dims()),
            None => ("disabled".to_string(), 0),
        };
        crate::lifecycle::fingerprint(&model_id, dims, &self.config.chunking, corpus)
    }

    pub fn state(&self) -> IndexState {
        self.lifecycle.state()
    }

    /// The active snapshot, or [`EngineError::IndexUnavailable`].
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.lifecycle
            .current()
            .ok_or(EngineError::IndexUnavailable)
    }

    /// Build or reuse the index snapshot for `corpus`. Idempotent unless
    /// `force` is set.
    pub async fn ensure_ready(&self, corpus: &[Document], force: bool) -> Result<Arc<Snapshot>> {
        self.lifecycle
            .ensure_ready(corpus, self.encoder.as_ref(), force)
            .await
    }

    /// Retrieve ranked candidates against the active snapshot.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Candidate>> {
        let snapshot = self.snapshot()?;
        retrieval::retrieve(
            &snapshot,
            self.encoder.as_ref(),
            &self.config.retrieval,
            request,
        )
        .await
    }

    /// Answer a question with hybrid retrieval and template synthesis.
    ///
    /// Returns `(answer_text, source_citations)`. Zero retrieval results are
    /// answered with the fixed no-information message, not an error.
    pub async fn answer(&self, query: &str, top_k: i64) -> Result<(String, Vec<String>)> {
        let request = RetrievalRequest::new(query, RetrievalMode::Hybrid, top_k);
        let candidates = self.retrieve(&request).await?;
        let answer = self.synthesizer.synthesize(query, &candidates);
        Ok((answer.text, answer.citations))
    }
}
