//! # Maildex
//!
//! A hybrid retrieval and answer-synthesis engine for archived mailboxes.
//!
//! Maildex indexes a corpus of archived messages two ways — a lexical index
//! with typed filters and fuzzy term matching, and a dense vector index over
//! chunked message text — then answers keyword queries and natural-language
//! questions by fusing both channels and synthesizing a grounded, cited
//! answer from the top matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────────┐
//! │ Record Store │──▶│ Chunker + Encoder │──▶│ Snapshot (SQLite) │
//! │  (ingestion) │   │  Lexical project  │   │ vectors + lexical │
//! └──────────────┘   └──────────────────┘   └─────────┬─────────┘
//!                                                     │
//!                              ┌──────────────────────┤
//!                              ▼                      ▼
//!                       ┌─────────────┐        ┌─────────────┐
//!                       │  Retrieval  │───────▶│   Answer    │
//!                       │ lex/sem/RRF │        │  synthesis  │
//!                       └─────────────┘        └─────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! mdx index --corpus corpus.json          # build or reuse the snapshot
//! mdx search "budget" --mode hybrid       # ranked retrieval
//! mdx ask "when is the next meeting?"     # grounded answer + citations
//! mdx status                              # snapshot state and counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Bounded-length text chunking |
//! | [`embedding`] | Embedding encoder abstraction |
//! | [`vector`] | In-memory cosine-similarity index |
//! | [`lexical`] | Filtered, fuzzy lexical index |
//! | [`snapshot`] | Versioned SQLite snapshot persistence |
//! | [`lifecycle`] | Fingerprinting and build lifecycle |
//! | [`retrieval`] | Lexical / semantic / hybrid orchestration |
//! | [`answer`] | Grounded answer synthesis |
//! | [`engine`] | Public engine facade |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod lexical;
pub mod lifecycle;
pub mod models;
pub mod retrieval;
pub mod snapshot;
pub mod vector;

pub use engine::Engine;
pub use error::{EngineError, Result};
