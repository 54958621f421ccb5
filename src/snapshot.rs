//! Index snapshot persistence.
//!
//! A snapshot is one SQLite database per corpus fingerprint, holding the
//! chunk table, chunk vectors (little-endian f32 BLOBs), the lexical record
//! table, and a `meta` table embedding the format version and fingerprint.
//! Snapshots whose format version or fingerprint does not match what the
//! caller expects are rejected at load time and rebuilt — never silently
//! loaded and misused.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;
use crate::lexical::{LexicalIndex, LexicalRecord};
use crate::models::{Chunk, ChunkKind, Direction};
use crate::vector::VectorIndex;

/// Bump when the table layout changes; older snapshots are then rebuilt.
pub const SNAPSHOT_FORMAT_VERSION: i64 = 1;

/// Database file name inside a snapshot directory.
pub const SNAPSHOT_FILE: &str = "index.sqlite";

const ADDR_SEPARATOR: &str = ";";

/// Build provenance recorded alongside the indexed data.
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub fingerprint: String,
    pub model_id: String,
    pub dims: usize,
    pub max_chars: usize,
    pub corpus_size: usize,
    pub build_id: String,
    pub built_at: i64,
    pub documents_skipped: u64,
    pub batches_skipped: u64,
}

/// A fully loaded, immutable index snapshot.
///
/// Query-time reads go against this in-memory state; SQLite is only touched
/// on build and load.
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub vector: VectorIndex,
    pub lexical: LexicalIndex,
    /// Chunk id → chunk, for resolving vector hits back to text.
    pub chunks: HashMap<String, Chunk>,
}

impl Snapshot {
    pub fn document_count(&self) -> usize {
        self.lexical.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, kind, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lexical_records (
            document_id TEXT PRIMARY KEY,
            from_addr TEXT NOT NULL,
            to_addrs TEXT NOT NULL,
            cc_addrs TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            date INTEGER,
            direction TEXT NOT NULL,
            has_attachments INTEGER NOT NULL,
            mailbox TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist a freshly built index into `dir`.
///
/// The caller is expected to build into a temporary directory and rename it
/// into place once this returns, so readers never observe a partial snapshot.
pub async fn persist(
    dir: &Path,
    meta: &SnapshotMeta,
    chunks: &[Chunk],
    vectors: &[(String, Vec<f32>)],
    records: &[LexicalRecord],
    bodies: &HashMap<String, String>,
) -> Result<()> {
    let db_path = dir.join(SNAPSHOT_FILE);
    let pool = connect(&db_path, true).await?;
    run_migrations(&pool).await?;

    let mut tx = pool.begin().await?;

    let meta_rows = [
        ("format_version", SNAPSHOT_FORMAT_VERSION.to_string()),
        ("fingerprint", meta.fingerprint.clone()),
        ("model", meta.model_id.clone()),
        ("dims", meta.dims.to_string()),
        ("max_chars", meta.max_chars.to_string()),
        ("corpus_size", meta.corpus_size.to_string()),
        ("build_id", meta.build_id.clone()),
        ("built_at", meta.built_at.to_string()),
        ("documents_skipped", meta.documents_skipped.to_string()),
        ("batches_skipped", meta.batches_skipped.to_string()),
    ];
    for (key, value) in meta_rows {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, seq, kind, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.seq)
        .bind(chunk.kind.as_str())
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    let chunk_owners: HashMap<&str, &str> = chunks
        .iter()
        .map(|c| (c.id.as_str(), c.document_id.as_str()))
        .collect();
    for (chunk_id, vector) in vectors {
        let document_id = chunk_owners
            .get(chunk_id.as_str())
            .copied()
            .unwrap_or_default();
        sqlx::query("INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(document_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
    }

    for record in records {
        let body = bodies
            .get(&record.document_id)
            .map(String::as_str)
            .unwrap_or("");
        sqlx::query(
            r#"
            INSERT INTO lexical_records
                (document_id, from_addr, to_addrs, cc_addrs, subject, body,
                 date, direction, has_attachments, mailbox)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.document_id)
        .bind(&record.from_addr)
        .bind(record.to_addrs.join(ADDR_SEPARATOR))
        .bind(record.cc_addrs.join(ADDR_SEPARATOR))
        .bind(&record.subject)
        .bind(body)
        .bind(record.date.map(|d| d.timestamp()))
        .bind(record.direction.to_string())
        .bind(record.has_attachments as i64)
        .bind(&record.mailbox)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

/// Load the snapshot stored in `dir`, if it exists and is compatible.
///
/// Returns `Ok(None)` when there is no database, when the format version or
/// fingerprint differs from `expected_fingerprint`, or when the stored data
/// is internally inconsistent — all cases where the caller should rebuild.
pub async fn load(dir: &Path, expected_fingerprint: &str) -> Result<Option<Snapshot>> {
    let db_path = dir.join(SNAPSHOT_FILE);
    if !db_path.exists() {
        return Ok(None);
    }

    let pool = connect(&db_path, false).await?;

    let meta_rows = sqlx::query("SELECT key, value FROM meta")
        .fetch_all(&pool)
        .await?;
    let meta_map: HashMap<String, String> = meta_rows
        .iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
        .collect();

    let format_version: i64 = match meta_map.get("format_version").and_then(|v| v.parse().ok()) {
        Some(v) => v,
        None => {
            pool.close().await;
            tracing::warn!(path = %db_path.display(), "snapshot has no format version, rejecting");
            return Ok(None);
        }
    };
    if format_version != SNAPSHOT_FORMAT_VERSION {
        pool.close().await;
        tracing::warn!(
            found = format_version,
            expected = SNAPSHOT_FORMAT_VERSION,
            "snapshot format version mismatch, rejecting"
        );
        return Ok(None);
    }

    let fingerprint = meta_map.get("fingerprint").cloned().unwrap_or_default();
    if fingerprint != expected_fingerprint {
        pool.close().await;
        tracing::warn!("snapshot fingerprint mismatch, rejecting");
        return Ok(None);
    }

    let dims: usize = meta_map
        .get("dims")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let meta = SnapshotMeta {
        fingerprint,
        model_id: meta_map.get("model").cloned().unwrap_or_default(),
        dims,
        max_chars: meta_map
            .get("max_chars")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        corpus_size: meta_map
            .get("corpus_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        build_id: meta_map.get("build_id").cloned().unwrap_or_default(),
        built_at: meta_map
            .get("built_at")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        documents_skipped: meta_map
            .get("documents_skipped")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        batches_skipped: meta_map
            .get("batches_skipped")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };

    // Chunks
    let chunk_rows =
        sqlx::query("SELECT id, document_id, seq, kind, text, hash FROM chunks ORDER BY rowid")
            .fetch_all(&pool)
            .await?;
    let mut chunks = HashMap::with_capacity(chunk_rows.len());
    for row in &chunk_rows {
        let kind_str: String = row.get("kind");
        let kind = match kind_str.parse::<ChunkKind>() {
            Ok(k) => k,
            Err(_) => {
                pool.close().await;
                tracing::warn!(kind = %kind_str, "snapshot chunk has unknown kind, rejecting");
                return Ok(None);
            }
        };
        let chunk = Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            seq: row.get("seq"),
            kind,
            text: row.get("text"),
            hash: row.get("hash"),
        };
        chunks.insert(chunk.id.clone(), chunk);
    }

    // Vectors, in insertion order so tie-breaking survives the round-trip.
    let vector_rows =
        sqlx::query("SELECT chunk_id, document_id, embedding FROM chunk_vectors ORDER BY rowid")
            .fetch_all(&pool)
            .await?;
    let mut vector = VectorIndex::new(dims);
    for row in &vector_rows {
        let blob: Vec<u8> = row.get("embedding");
        let vec = blob_to_vec(&blob);
        if vec.len() != dims {
            pool.close().await;
            tracing::warn!("snapshot vector has wrong dimension, rejecting");
            return Ok(None);
        }
        let chunk_id: String = row.get("chunk_id");
        let document_id: String = row.get("document_id");
        if vector.add(&chunk_id, &document_id, vec).is_err() {
            pool.close().await;
            return Ok(None);
        }
    }

    // Lexical records
    let record_rows = sqlx::query(
        r#"
        SELECT document_id, from_addr, to_addrs, cc_addrs, subject, body,
               date, direction, has_attachments, mailbox
        FROM lexical_records ORDER BY rowid
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut records = Vec::with_capacity(record_rows.len());
    for row in &record_rows {
        let direction_str: String = row.get("direction");
        let direction = match direction_str.parse::<Direction>() {
            Ok(d) => d,
            Err(_) => {
                pool.close().await;
                tracing::warn!("snapshot record has unknown direction, rejecting");
                return Ok(None);
            }
        };
        let date = row
            .get::<Option<i64>, _>("date")
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));
        let body: String = row.get("body");

        records.push(LexicalRecord::new(
            row.get("document_id"),
            row.get("from_addr"),
            split_addrs(&row.get::<String, _>("to_addrs")),
            split_addrs(&row.get::<String, _>("cc_addrs")),
            row.get("subject"),
            &body,
            date,
            direction,
            row.get::<i64, _>("has_attachments") != 0,
            row.get("mailbox"),
        ));
    }

    pool.close().await;

    Ok(Some(Snapshot {
        meta,
        vector,
        lexical: LexicalIndex::from_records(records),
        chunks,
    }))
}

fn split_addrs(joined: &str) -> Vec<String> {
    joined
        .split(ADDR_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;

    fn sample_meta(fingerprint: &str) -> SnapshotMeta {
        SnapshotMeta {
            fingerprint: fingerprint.to_string(),
            model_id: "feature-hash-64".into(),
            dims: 2,
            max_chars: 512,
            corpus_size: 1,
            build_id: "build-1".into(),
            built_at: 1_700_000_000,
            documents_skipped: 0,
            batches_skipped: 0,
        }
    }

    fn sample_record() -> LexicalRecord {
        LexicalRecord::new(
            "m1".into(),
            "a@example.org".into(),
            vec!["b@example.org".into()],
            vec![],
            "Réunion budget".into(),
            "Discussion sur le budget",
            None,
            Direction::Sent,
            false,
            "mailbox_1".into(),
        )
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = Chunk::new("m1", 0, ChunkKind::Body, "Discussion sur le budget");
        let vectors = vec![(chunk.id.clone(), vec![0.6f32, 0.8])];
        let mut bodies = HashMap::new();
        bodies.insert("m1".to_string(), "Discussion sur le budget".to_string());

        persist(
            dir.path(),
            &sample_meta("fp-1"),
            std::slice::from_ref(&chunk),
            &vectors,
            &[sample_record()],
            &bodies,
        )
        .await
        .unwrap();

        let snap = load(dir.path(), "fp-1").await.unwrap().unwrap();
        assert_eq!(snap.meta.build_id, "build-1");
        assert_eq!(snap.chunk_count(), 1);
        assert_eq!(snap.document_count(), 1);
        assert_eq!(snap.vector.len(), 1);

        let hits = snap.vector.search(&[0.6, 0.8], 1).unwrap();
        assert_eq!(hits[0].chunk_id, chunk.id);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), "fp-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        persist(
            dir.path(),
            &sample_meta("fp-old"),
            &[],
            &[],
            &[sample_record()],
            &HashMap::new(),
        )
        .await
        .unwrap();

        assert!(load(dir.path(), "fp-new").await.unwrap().is_none());
        assert!(load(dir.path(), "fp-old").await.unwrap().is_some());
    }
}
