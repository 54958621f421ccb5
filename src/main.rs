//! # Maildex CLI (`mdx`)
//!
//! The `mdx` binary drives the retrieval engine over a corpus snapshot
//! produced by an external ingestion tool (a JSON array of documents).
//!
//! ## Usage
//!
//! ```bash
//! mdx --config ./config/maildex.toml --corpus ./corpus.json <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdx index` | Build the index snapshot, or reuse a matching one |
//! | `mdx search "<query>"` | Ranked lexical/semantic/hybrid retrieval |
//! | `mdx ask "<question>"` | Grounded answer plus source citations |
//! | `mdx status` | Snapshot state, fingerprint, and counts |
//!
//! ## Examples
//!
//! ```bash
//! # Build (or reuse) the snapshot
//! mdx index
//!
//! # Force a rebuild after changing the embedding model
//! mdx index --force
//!
//! # Fuzzy keyword search over subjects only
//! mdx search "budjet" --field subject --fuzziness 1
//!
//! # Browse all sent messages with attachments from May 2024
//! mdx search --direction sent --has-attachments true \
//!     --since 2024-05-01 --until 2024-05-31
//!
//! # Ask a question
//! mdx ask "when is the next committee meeting?"
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use maildex::config::{load_config, Config};
use maildex::lexical::{DateRange, Filter, Fuzziness, SearchField};
use maildex::models::{Direction, Document};
use maildex::retrieval::{RetrievalMode, RetrievalRequest};
use maildex::{snapshot, Engine};

/// Maildex CLI — hybrid retrieval and grounded answers over archived
/// mailboxes.
///
/// All commands accept `--config` (TOML settings) and `--corpus` (a JSON
/// array of documents produced by an ingestion tool).
#[derive(Parser)]
#[command(
    name = "mdx",
    about = "Maildex — hybrid retrieval and answer synthesis for archived mailboxes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/maildex.toml")]
    config: PathBuf,

    /// Path to the corpus snapshot (JSON array of documents).
    #[arg(long, global = true, default_value = "./corpus.json")]
    corpus: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index snapshot for the corpus, or reuse a matching one.
    ///
    /// Chunks every document, embeds the chunks, projects lexical records,
    /// and persists everything under a fingerprinted snapshot directory.
    /// Idempotent: a second run over the same corpus reuses the snapshot.
    Index {
        /// Rebuild even when a matching snapshot exists.
        #[arg(long)]
        force: bool,
    },

    /// Search the corpus and print ranked results.
    Search {
        /// Query text. May be omitted when at least one filter is given
        /// (browse mode).
        query: Option<String>,

        /// Retrieval mode: `lexical`, `semantic`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Restrict lexical matching to these fields (repeatable):
        /// subject, body, from_name, to_name, from, to. Unknown names are
        /// ignored.
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Only messages with this direction: `sent` or `received`.
        #[arg(long)]
        direction: Option<String>,

        /// Only messages from this exact sender address.
        #[arg(long)]
        sender: Option<String>,

        /// Only messages addressed (To or Cc) to this exact address.
        #[arg(long)]
        recipient: Option<String>,

        /// Only messages with (true) or without (false) attachments.
        #[arg(long)]
        has_attachments: Option<bool>,

        /// Only messages from this mailbox.
        #[arg(long)]
        mailbox: Option<String>,

        /// Only messages dated on or after this day (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only messages dated on or before this day (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Edit tolerance for lexical terms: 0, 1, 2, or auto.
        #[arg(long, default_value = "0")]
        fuzziness: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Ask a question and print a grounded answer with its sources.
    Ask {
        /// The question.
        question: String,

        /// Number of candidates to retrieve before synthesis.
        #[arg(long, default_value_t = 5)]
        top_k: i64,
    },

    /// Show snapshot state, fingerprint, and index counts.
    Status,
}

fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let docs: Vec<Document> =
        serde_json::from_str(&content).with_context(|| "Failed to parse corpus JSON")?;
    Ok(docs)
}

fn parse_day(value: &str, end_of_day: bool) -> Result<chrono::DateTime<chrono::Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Malformed date bound: {} (expected YYYY-MM-DD)", value))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    Ok(time.unwrap().and_utc())
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    query: Option<String>,
    mode: &str,
    fields: &[String],
    direction: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
    has_attachments: Option<bool>,
    mailbox: Option<String>,
    since: Option<String>,
    until: Option<String>,
    fuzziness: &str,
    limit: i64,
) -> Result<RetrievalRequest> {
    let mode: RetrievalMode = mode.parse().map_err(anyhow::Error::msg)?;
    let mut request = RetrievalRequest::new(query.unwrap_or_default(), mode, limit);

    // Unknown field names are skipped rather than rejected.
    let parsed_fields: Vec<SearchField> = fields
        .iter()
        .filter_map(|name| {
            let field = SearchField::parse(name);
            if field.is_none() {
                tracing::warn!(field = %name, "ignoring unknown search field");
            }
            field
        })
        .collect();
    if !parsed_fields.is_empty() {
        request.fields = Some(parsed_fields);
    }

    if let Some(d) = direction {
        let d: Direction = d.parse().map_err(anyhow::Error::msg)?;
        request.filters.push(Filter::Direction(d));
    }
    if let Some(addr) = sender {
        request.filters.push(Filter::Sender(addr));
    }
    if let Some(addr) = recipient {
        request.filters.push(Filter::Recipient(addr));
    }
    if let Some(flag) = has_attachments {
        request.filters.push(Filter::HasAttachments(flag));
    }
    if let Some(name) = mailbox {
        request.filters.push(Filter::Mailbox(name));
    }

    if since.is_some() || until.is_some() {
        request.date_range = Some(DateRange {
            start: since.as_deref().map(|s| parse_day(s, false)).transpose()?,
            end: until.as_deref().map(|s| parse_day(s, true)).transpose()?,
            end_inclusive: true,
        });
    }

    request.fuzziness = fuzziness.parse::<Fuzziness>().map_err(anyhow::Error::msg)?;

    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("maildex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg: Config = load_config(&cli.config)?;
    let corpus = load_corpus(&cli.corpus)?;
    let engine = Engine::new(cfg.clone())?;

    match cli.command {
        Commands::Index { force } => {
            let snapshot = engine.ensure_ready(&corpus, force).await?;
            if force {
                println!("index (forced rebuild)");
            } else {
                println!("index");
            }
            println!("  fingerprint: {}", snapshot.meta.fingerprint);
            println!("  documents: {}", snapshot.document_count());
            println!("  chunks: {}", snapshot.chunk_count());
            println!("  vectors: {}", snapshot.vector.len());
            if snapshot.meta.documents_skipped > 0 {
                println!(
                    "  documents without indexable text: {}",
                    snapshot.meta.documents_skipped
                );
            }
            println!("ok");
        }

        Commands::Search {
            query,
            mode,
            fields,
            direction,
            sender,
            recipient,
            has_attachments,
            mailbox,
            since,
            until,
            fuzziness,
            limit,
        } => {
            let request = build_request(
                query,
                &mode,
                &fields,
                direction,
                sender,
                recipient,
                has_attachments,
                mailbox,
                since,
                until,
                &fuzziness,
                limit,
            )?;

            engine.ensure_ready(&corpus, false).await?;
            let results = engine.retrieve(&request).await?;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, candidate) in results.iter().enumerate() {
                let date = candidate
                    .date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "undated".to_string());
                let subject = if candidate.subject.is_empty() {
                    "(no subject)"
                } else {
                    candidate.subject.as_str()
                };

                println!(
                    "{}. [{:.3}] {} / {}",
                    i + 1,
                    candidate.score,
                    candidate.mailbox,
                    subject
                );
                println!(
                    "    from: {} ({})",
                    candidate.from, candidate.direction
                );
                println!("    date: {}", date);
                println!(
                    "    excerpt: \"{}\"",
                    candidate.snippet.replace('\n', " ").trim()
                );
                println!("    id: {}", candidate.document_id);
                println!();
            }
        }

        Commands::Ask { question, top_k } => {
            engine.ensure_ready(&corpus, false).await?;
            let (answer, citations) = engine.answer(&question, top_k).await?;

            println!("{}", answer);
            if !citations.is_empty() {
                println!("\nSources:");
                for citation in citations {
                    println!("\n{}", citation);
                }
            }
        }

        Commands::Status => {
            let fingerprint = engine.corpus_fingerprint(&corpus);
            let dir = cfg.index.dir.join(&fingerprint);
            println!("status");
            println!("  documents in corpus: {}", corpus.len());
            println!("  fingerprint: {}", fingerprint);
            println!(
                "  semantic capability: {}",
                if engine.semantic_enabled() {
                    "enabled"
                } else {
                    "disabled"
                }
            );

            match snapshot::load(&dir, &fingerprint).await? {
                Some(snap) => {
                    println!("  snapshot: ready");
                    println!("  built at: {}", snap.meta.built_at);
                    println!("  chunks: {}", snap.chunk_count());
                    println!("  vectors: {}", snap.vector.len());
                }
                None => println!("  snapshot: absent (run `mdx index`)"),
            }
        }
    }

    Ok(())
}
