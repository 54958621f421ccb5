//! Retrieval orchestration: lexical, semantic, and hybrid modes.
//!
//! Lexical mode delegates entirely to the lexical index; semantic mode
//! encodes the query and searches the vector index, resolving chunk hits
//! back to their owning documents; hybrid mode runs both channels and merges
//! them with reciprocal-rank fusion, since lexical match-strength scores and
//! cosine similarities are not numerically comparable.
//!
//! Hybrid degradations: an empty query becomes filter-only lexical browsing
//! (there is nothing to embed), and an absent or unavailable semantic
//! capability degrades hybrid to lexical-only with a warning. Pure semantic
//! mode propagates [`EngineError::ModelUnavailable`] instead.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingEncoder;
use crate::error::{EngineError, Result};
use crate::lexical::{DateRange, Filter, Fuzziness, LexicalQuery, SearchField};
use crate::models::Direction;
use crate::snapshot::Snapshot;

/// Which index backs a retrieval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalMode {
    Lexical,
    Semantic,
    #[default]
    Hybrid,
}

impl std::str::FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" | "keyword" => Ok(RetrievalMode::Lexical),
            "semantic" => Ok(RetrievalMode::Semantic),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(format!(
                "unknown retrieval mode: {} (use lexical, semantic, or hybrid)",
                other
            )),
        }
    }
}

/// Which channel produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    Lexical,
    Semantic,
    Hybrid,
}

/// One retrieval invocation.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub mode: RetrievalMode,
    pub top_k: i64,
    /// `None` selects all lexical fields.
    pub fields: Option<Vec<SearchField>>,
    pub filters: Vec<Filter>,
    pub date_range: Option<DateRange>,
    pub fuzziness: Fuzziness,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, mode: RetrievalMode, top_k: i64) -> Self {
        Self {
            query: query.into(),
            mode,
            top_k,
            fields: None,
            filters: Vec::new(),
            date_range: None,
            fuzziness: Fuzziness::default(),
        }
    }
}

/// A ranked retrieval result with denormalized display metadata.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub document_id: String,
    /// Set for chunk-level (semantic) hits.
    pub chunk_id: Option<String>,
    /// Lexical match strength, cosine similarity, or RRF score depending on
    /// `origin` — not comparable across origins.
    pub score: f64,
    pub origin: MatchOrigin,
    pub snippet: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub mailbox: String,
    pub direction: Direction,
}

/// Retrieve top-K candidates for a query against a READY snapshot.
pub async fn retrieve(
    snapshot: &Snapshot,
    encoder: Option<&Arc<dyn EmbeddingEncoder>>,
    cfg: &RetrievalConfig,
    req: &RetrievalRequest,
) -> Result<Vec<Candidate>> {
    if req.top_k <= 0 {
        return Err(EngineError::Validation(format!(
            "top_k must be positive, got {}",
            req.top_k
        )));
    }
    let top_k = req.top_k as usize;

    if snapshot.document_count() == 0 {
        return Ok(Vec::new());
    }

    match req.mode {
        RetrievalMode::Lexical => lexical_candidates(snapshot, req, top_k),
        RetrievalMode::Semantic => {
            let mut hits = semantic_candidates(snapshot, encoder, cfg, req).await?;
            hits.truncate(top_k);
            Ok(hits)
        }
        RetrievalMode::Hybrid => {
            // Nothing to embed: degrade to filter-only lexical browsing.
            if req.query.trim().is_empty() {
                return lexical_candidates(snapshot, req, top_k);
            }

            let lexical = lexical_candidates(snapshot, req, cfg.candidate_k_lexical)?;

            let semantic = match semantic_candidates(snapshot, encoder, cfg, req).await {
                Ok(hits) => hits,
                Err(EngineError::ModelUnavailable(reason)) => {
                    tracing::warn!(%reason, "semantic channel unavailable, hybrid degrades to lexical");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            if semantic.is_empty() {
                let mut out = lexical;
                out.truncate(top_k);
                return Ok(out);
            }

            Ok(fuse(lexical, semantic, cfg.rrf_k, top_k))
        }
    }
}

fn lexical_candidates(
    snapshot: &Snapshot,
    req: &RetrievalRequest,
    limit: usize,
) -> Result<Vec<Candidate>> {
    let query = LexicalQuery {
        text: req.query.clone(),
        fields: req.fields.clone(),
        filters: req.filters.clone(),
        date_range: req.date_range,
        fuzziness: req.fuzziness,
        limit,
    };

    let hits = snapshot.lexical.search(&query)?;

    Ok(hits
        .into_iter()
        .filter_map(|hit| {
            let record = snapshot.lexical.get(&hit.document_id)?;
            Some(Candidate {
                document_id: hit.document_id,
                chunk_id: None,
                score: hit.score,
                origin: MatchOrigin::Lexical,
                snippet: hit.snippet,
                from: record.from_addr.clone(),
                to: record.to_addrs.clone(),
                subject: record.subject.clone(),
                date: record.date,
                mailbox: record.mailbox.clone(),
                direction: record.direction,
            })
        })
        .collect())
}

async fn semantic_candidates(
    snapshot: &Snapshot,
    encoder: Option<&Arc<dyn EmbeddingEncoder>>,
    cfg: &RetrievalConfig,
    req: &RetrievalRequest,
) -> Result<Vec<Candidate>> {
    let encoder = encoder.ok_or_else(|| {
        EngineError::ModelUnavailable("no embedding encoder is configured".into())
    })?;

    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if let Some(range) = &req.date_range {
        range.validate()?;
    }

    let query_vec = encoder.encode_query(&req.query).await?;
    let hits = snapshot.vector.search(&query_vec, cfg.candidate_k_vector)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for hit in hits {
        // Hits arrive sorted by score, so the first chunk per document wins.
        if !seen.insert(hit.document_id.clone()) {
            continue;
        }

        let record = match snapshot.lexical.get(&hit.document_id) {
            Some(r) => r,
            None => {
                tracing::warn!(document = %hit.document_id, "vector hit has no lexical record");
                continue;
            }
        };

        if !record.passes(&req.filters, req.date_range.as_ref()) {
            continue;
        }

        let snippet = snapshot
            .chunks
            .get(&hit.chunk_id)
            .map(|c| c.text.chars().take(240).collect::<String>())
            .unwrap_or_default();

        candidates.push(Candidate {
            document_id: hit.document_id,
            chunk_id: Some(hit.chunk_id),
            score: hit.score as f64,
            origin: MatchOrigin::Semantic,
            snippet,
            from: record.from_addr.clone(),
            to: record.to_addrs.clone(),
            subject: record.subject.clone(),
            date: record.date,
            mailbox: record.mailbox.clone(),
            direction: record.direction,
        });
    }

    Ok(candidates)
}

/// Merge the two channels by document-level reciprocal-rank fusion:
/// `score(d) = Σ 1 / (k + rank_channel(d))`, ranks 1-indexed. Candidates are
/// deduplicated by document id, keeping the entry from the channel where the
/// document ranked best.
fn fuse(
    lexical: Vec<Candidate>,
    semantic: Vec<Candidate>,
    rrf_k: f64,
    top_k: usize,
) -> Vec<Candidate> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    // document id → (best rank, candidate)
    let mut representatives: HashMap<String, (usize, Candidate)> = HashMap::new();

    for list in [lexical, semantic] {
        let mut rank = 0usize;
        let mut seen: HashSet<String> = HashSet::new();
        for candidate in list {
            if !seen.insert(candidate.document_id.clone()) {
                continue;
            }
            rank += 1;
            *scores.entry(candidate.document_id.clone()).or_insert(0.0) +=
                1.0 / (rrf_k + rank as f64);

            match representatives.get(&candidate.document_id) {
                Some((best_rank, _)) if *best_rank <= rank => {}
                _ => {
                    representatives.insert(candidate.document_id.clone(), (rank, candidate));
                }
            }
        }
    }

    let mut fused: Vec<Candidate> = representatives
        .into_values()
        .map(|(_, mut candidate)| {
            candidate.score = scores[&candidate.document_id];
            candidate.origin = MatchOrigin::Hybrid;
            candidate
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    fused.truncate(top_k);
    fused
}
