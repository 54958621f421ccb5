//! Core data models used throughout Maildex.
//!
//! These types represent the archived messages, chunks, and lexical
//! projections that flow through the indexing and retrieval pipeline.
//! Documents are produced by an external ingestion collaborator and are
//! immutable once loaded into a corpus snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether a message left the archive holder's mailbox or arrived in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sent" => Ok(Direction::Sent),
            "received" => Ok(Direction::Received),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Sent => write!(f, "sent"),
            Direction::Received => write!(f, "received"),
        }
    }
}

/// One archived message, as handed over by the ingestion pipeline.
///
/// `id` is unique within a corpus snapshot; `date`, when present, is
/// timezone-aware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub has_attachments: bool,
    pub direction: Direction,
    #[serde(default)]
    pub mailbox: String,
}

impl Document {
    /// Content-identity hash used in the corpus fingerprint.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.subject.as_bytes());
        hasher.update(self.body.as_bytes());
        if let Some(d) = self.date {
            hasher.update(d.timestamp().to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// What part of a message a chunk was cut from. Subject text is indexed as
/// its own chunk kind so it is never conflated with body semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Body,
    Subject,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Body => "body",
            ChunkKind::Subject => "subject",
        }
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "body" => Ok(ChunkKind::Body),
            "subject" => Ok(ChunkKind::Subject),
            other => Err(format!("unknown chunk kind: {}", other)),
        }
    }
}

/// A bounded-length slice of a document's text, the unit of dense indexing.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id: `"{document_id}#{kind}{seq}"`.
    pub id: String,
    pub document_id: String,
    /// Sequence number within the owning document, per kind, starting at 0.
    pub seq: i64,
    pub kind: ChunkKind,
    pub text: String,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

impl Chunk {
    pub fn new(document_id: &str, seq: i64, kind: ChunkKind, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        Chunk {
            id: format!("{}#{}{}", document_id, kind.as_str(), seq),
            document_id: document_id.to_string(),
            seq,
            kind,
            text: text.to_string(),
            hash,
        }
    }
}
