//! Index lifecycle management.
//!
//! Drives the `ABSENT → BUILDING → READY` state machine. A snapshot is keyed
//! by a fingerprint of (encoder model, chunking parameters, corpus identity);
//! `ensure_ready` reuses a matching in-memory or on-disk snapshot and only
//! builds when the fingerprint changes or a rebuild is forced.
//!
//! Builds are serialized by a `tokio::Mutex` and written into a temporary
//! directory that is renamed into place once fully persisted, so concurrent
//! readers always observe either the old or the new complete snapshot.
//! A failed build leaves the prior snapshot untouched.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingEncoder;
use crate::error::{EngineError, Result};
use crate::lexical::LexicalRecord;
use crate::models::{Chunk, Document};
use crate::snapshot::{self, Snapshot, SnapshotMeta};

/// Lifecycle states. `Building` is only observable from other tasks while a
/// build is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Absent,
    Building,
    Ready,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Absent => write!(f, "absent"),
            IndexState::Building => write!(f, "building"),
            IndexState::Ready => write!(f, "ready"),
        }
    }
}

/// Compute the snapshot fingerprint for a corpus under the given encoder and
/// chunking parameters. Stable under corpus reordering.
pub fn fingerprint(
    model_id: &str,
    dims: usize,
    chunking: &ChunkingConfig,
    corpus: &[Document],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(dims.to_le_bytes());
    hasher.update(chunking.max_chars.to_le_bytes());
    hasher.update([chunking.align_whitespace as u8, chunking.index_subject as u8]);
    hasher.update((corpus.len() as u64).to_le_bytes());

    let mut identities: Vec<String> = corpus.iter().map(Document::identity_hash).collect();
    identities.sort_unstable();
    for identity in identities {
        hasher.update(identity.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// Owns the active snapshot and serializes rebuilds.
pub struct LifecycleManager {
    index_dir: PathBuf,
    chunking: ChunkingConfig,
    batch_size: usize,
    state: RwLock<IndexState>,
    active: RwLock<Option<Arc<Snapshot>>>,
    build_lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(config: &Config) -> Self {
        Self {
            index_dir: config.index.dir.clone(),
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            state: RwLock::new(IndexState::Absent),
            active: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> IndexState {
        *self.state.read().unwrap()
    }

    /// The currently active snapshot, if any.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.active.read().unwrap().clone()
    }

    fn set_state(&self, state: IndexState) {
        *self.state.write().unwrap() = state;
    }

    fn swap_active(&self, snapshot: Arc<Snapshot>) {
        *self.active.write().unwrap() = Some(snapshot);
        self.set_state(IndexState::Ready);
    }

    /// Make a snapshot for `corpus` available, building one only when needed.
    ///
    /// Idempotent unless `force` is set: a second call with the same corpus
    /// returns the same snapshot without re-running the build.
    pub async fn ensure_ready(
        &self,
        corpus: &[Document],
        encoder: Option<&Arc<dyn EmbeddingEncoder>>,
        force: bool,
    ) -> Result<Arc<Snapshot>> {
        let (model_id, dims) = match encoder {
            Some(e) => (e.model_id().to_string(), e.dims()),
            None => ("disabled".to_string(), 0),
        };
        let fp = fingerprint(&model_id, dims, &self.chunking, corpus);

        if !force {
            if let Some(active) = self.current() {
                if active.meta.fingerprint == fp {
                    return Ok(active);
                }
            }
        }

        // One build at a time per corpus directory.
        let _guard = self.build_lock.lock().await;

        if !force {
            // Another caller may have finished the same build while we
            // waited for the lock.
            if let Some(active) = self.current() {
                if active.meta.fingerprint == fp {
                    return Ok(active);
                }
            }

            // Reuse a persisted snapshot across process restarts.
            let final_dir = self.index_dir.join(&fp);
            if let Some(snap) = snapshot::load(&final_dir, &fp).await? {
                tracing::info!(fingerprint = %fp, "reusing persisted index snapshot");
                let arc = Arc::new(snap);
                self.swap_active(arc.clone());
                return Ok(arc);
            }
        }

        self.set_state(IndexState::Building);
        tracing::info!(
            fingerprint = %fp,
            documents = corpus.len(),
            forced = force,
            "building index snapshot"
        );

        let result = self.build(corpus, encoder, &model_id, dims, &fp).await;

        match result {
            Ok(snap) => {
                let arc = Arc::new(snap);
                self.swap_active(arc.clone());
                tracing::info!(
                    fingerprint = %fp,
                    chunks = arc.chunk_count(),
                    vectors = arc.vector.len(),
                    "index snapshot ready"
                );
                Ok(arc)
            }
            Err(e) => {
                // The prior snapshot, if any, stays usable.
                let prior = self.current();
                self.set_state(if prior.is_some() {
                    IndexState::Ready
                } else {
                    IndexState::Absent
                });
                match e {
                    EngineError::ModelUnavailable(_) => Err(e),
                    other => Err(EngineError::BuildFailure(other.to_string())),
                }
            }
        }
    }

    async fn build(
        &self,
        corpus: &[Document],
        encoder: Option<&Arc<dyn EmbeddingEncoder>>,
        model_id: &str,
        dims: usize,
        fp: &str,
    ) -> Result<Snapshot> {
        let build_id = Uuid::new_v4().to_string();

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut documents_skipped = 0u64;
        for doc in corpus {
            let doc_chunks = chunk_document(doc, &self.chunking);
            if doc_chunks.is_empty() {
                documents_skipped += 1;
                tracing::warn!(document = %doc.id, "document has no indexable text");
            }
            chunks.extend(doc_chunks);
        }

        let mut vectors: Vec<(String, Vec<f32>)> = Vec::new();
        let mut batches_skipped = 0u64;
        if let Some(encoder) = encoder {
            for batch in chunks.chunks(self.batch_size.max(1)) {
                self.encode_batch(encoder.as_ref(), batch, &mut vectors, &mut batches_skipped)
                    .await?;
            }
        }

        let records: Vec<LexicalRecord> =
            corpus.iter().map(LexicalRecord::from_document).collect();
        let bodies: HashMap<String, String> = corpus
            .iter()
            .map(|d| (d.id.clone(), d.body.clone()))
            .collect();

        let meta = SnapshotMeta {
            fingerprint: fp.to_string(),
            model_id: model_id.to_string(),
            dims,
            max_chars: self.chunking.max_chars,
            corpus_size: corpus.len(),
            build_id: build_id.clone(),
            built_at: chrono::Utc::now().timestamp(),
            documents_skipped,
            batches_skipped,
        };

        // Persist into a scratch directory first; readers only ever see the
        // renamed, fully written snapshot.
        let tmp_dir = self
            .index_dir
            .join(format!("{}.building-{}", fp, &build_id[..8]));
        snapshot::persist(&tmp_dir, &meta, &chunks, &vectors, &records, &bodies).await?;

        let final_dir = self.index_dir.join(fp);
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir)?;
        }
        std::fs::rename(&tmp_dir, &final_dir)?;

        snapshot::load(&final_dir, fp)
            .await?
            .ok_or_else(|| EngineError::BuildFailure("persisted snapshot failed to load".into()))
    }

    /// Encode one batch, retrying once at half size on a transient failure.
    /// A batch that still fails is skipped (its chunks stay lexically
    /// searchable); fatal encoder errors abort the build.
    async fn encode_batch(
        &self,
        encoder: &dyn EmbeddingEncoder,
        batch: &[Chunk],
        vectors: &mut Vec<(String, Vec<f32>)>,
        batches_skipped: &mut u64,
    ) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        match encoder.encode(&texts).await {
            Ok(batch_vectors) => {
                for (chunk, vector) in batch.iter().zip(batch_vectors) {
                    vectors.push((chunk.id.clone(), vector));
                }
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "embedding batch failed, retrying at half size");
                let half = (batch.len() / 2).max(1);
                for sub in batch.chunks(half) {
                    let sub_texts: Vec<String> = sub.iter().map(|c| c.text.clone()).collect();
                    match encoder.encode(&sub_texts).await {
                        Ok(sub_vectors) => {
                            for (chunk, vector) in sub.iter().zip(sub_vectors) {
                                vectors.push((chunk.id.clone(), vector));
                            }
                        }
                        Err(e2) if e2.is_retryable() => {
                            *batches_skipped += 1;
                            tracing::warn!(
                                error = %e2,
                                chunks = sub.len(),
                                "skipping embedding batch after retry"
                            );
                        }
                        Err(e2) => return Err(e2),
                    }
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn doc(id: &str, body: &str) -> Document {
        Document {
            id: id.into(),
            date: None,
            from: "a@example.org".into(),
            to: vec![],
            cc: vec![],
            subject: format!("subject {}", id),
            body: body.into(),
            attachments: vec![],
            has_attachments: false,
            direction: Direction::Received,
            mailbox: "mbx".into(),
        }
    }

    #[test]
    fn test_fingerprint_changes_with_model() {
        let chunking = ChunkingConfig::default();
        let corpus = vec![doc("m1", "body")];
        let a = fingerprint("model-a", 64, &chunking, &corpus);
        let b = fingerprint("model-b", 64, &chunking, &corpus);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_stable_under_reordering() {
        let chunking = ChunkingConfig::default();
        let d1 = doc("m1", "alpha");
        let d2 = doc("m2", "beta");
        let a = fingerprint("m", 64, &chunking, &[d1.clone(), d2.clone()]);
        let b = fingerprint("m", 64, &chunking, &[d2, d1]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_corpus() {
        let chunking = ChunkingConfig::default();
        let a = fingerprint("m", 64, &chunking, &[doc("m1", "alpha")]);
        let b = fingerprint("m", 64, &chunking, &[doc("m1", "alpha"), doc("m2", "beta")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_chunking() {
        let corpus = vec![doc("m1", "body")];
        let small = ChunkingConfig {
            max_chars: 128,
            ..ChunkingConfig::default()
        };
        let a = fingerprint("m", 64, &ChunkingConfig::default(), &corpus);
        let b = fingerprint("m", 64, &small, &corpus);
        assert_ne!(a, b);
    }
}
