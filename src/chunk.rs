//! Bounded-length text chunker.
//!
//! Splits a document's body into [`Chunk`]s of at most `max_chars`
//! characters, optionally pulling each split back to the last whitespace so
//! words are not cut in half. Subject text, when indexed, becomes a single
//! chunk of its own kind so subject and body semantics stay separate.
//!
//! Chunking is a pure function of the document and the chunking config:
//! concatenating a document's body chunks reproduces the body text up to
//! whitespace normalization at chunk boundaries.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkKind, Document};

/// Produce all chunks for one document. Documents with an empty body yield
/// no body chunks but may still yield a subject chunk.
pub fn chunk_document(doc: &Document, cfg: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (seq, piece) in split_text(&doc.body, cfg.max_chars, cfg.align_whitespace)
        .into_iter()
        .enumerate()
    {
        chunks.push(Chunk::new(&doc.id, seq as i64, ChunkKind::Body, &piece));
    }

    if cfg.index_subject && !doc.subject.trim().is_empty() {
        chunks.push(Chunk::new(&doc.id, 0, ChunkKind::Subject, doc.subject.trim()));
    }

    chunks
}

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Splits happen at character boundaries, never inside a multi-byte
/// character. With `align` set, each split is pulled back to the last
/// whitespace inside the window when one exists.
pub fn split_text(text: &str, max_chars: usize, align: bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_chars {
            pieces.push(remaining.to_string());
            break;
        }

        // Byte offset of the max_chars-th character boundary.
        let hard = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let cut = if align {
            remaining[..hard]
                .rfind(char::is_whitespace)
                .and_then(|pos| {
                    let ws = remaining[pos..].chars().next()?;
                    Some(pos + ws.len_utf8())
                })
                .filter(|&pos| pos > 0)
                .unwrap_or(hard)
        } else {
            hard
        };

        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn doc(subject: &str, body: &str) -> Document {
        Document {
            id: "msg-1".into(),
            date: None,
            from: "a@example.org".into(),
            to: vec!["b@example.org".into()],
            cc: vec![],
            subject: subject.into(),
            body: body.into(),
            attachments: vec![],
            has_attachments: false,
            direction: Direction::Received,
            mailbox: "mbx".into(),
        }
    }

    fn normalize_ws(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_short_body_single_chunk() {
        let cfg = ChunkingConfig::default();
        let chunks = chunk_document(&doc("", "Hello, world!"), &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Body);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_body_subject_only() {
        let cfg = ChunkingConfig::default();
        let chunks = chunk_document(&doc("Réunion budget", ""), &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Subject);
        assert_eq!(chunks[0].text, "Réunion budget");
    }

    #[test]
    fn test_empty_document_no_chunks() {
        let cfg = ChunkingConfig::default();
        assert!(chunk_document(&doc("", "   "), &cfg).is_empty());
    }

    #[test]
    fn test_long_body_splits_within_limit() {
        let cfg = ChunkingConfig {
            max_chars: 512,
            align_whitespace: true,
            index_subject: false,
        };
        let body = "word ".repeat(400); // 2000 characters
        let chunks = chunk_document(&doc("", &body), &cfg);
        assert!(chunks.len() >= 4, "expected >= 4 chunks, got {}", chunks.len());
        for c in &chunks {
            assert!(c.text.chars().count() <= 512);
            assert_eq!(c.document_id, "msg-1");
            assert_eq!(c.kind, ChunkKind::Body);
        }
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.seq, i as i64);
        }
    }

    #[test]
    fn test_concatenation_roundtrip() {
        let cfg = ChunkingConfig {
            max_chars: 40,
            align_whitespace: true,
            index_subject: false,
        };
        let body = "The archive committee met on Tuesday to discuss \
                    the budget forecast and the digitization backlog for \
                    the coming year in considerable detail.";
        let chunks = chunk_document(&doc("", body), &cfg);
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(normalize_ws(body), normalize_ws(&joined));
    }

    #[test]
    fn test_multibyte_text_never_split_mid_character() {
        let cfg = ChunkingConfig {
            max_chars: 10,
            align_whitespace: false,
            index_subject: false,
        };
        let body = "éàüöç".repeat(20);
        let chunks = chunk_document(&doc("", &body), &cfg);
        assert_eq!(chunks.len(), 10);
        for c in &chunks {
            assert_eq!(c.text.chars().count(), 10);
        }
    }

    #[test]
    fn test_unaligned_split_is_hard_cut() {
        let pieces = split_text(&"a".repeat(25), 10, false);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].len(), 10);
        assert_eq!(pieces[2].len(), 5);
    }

    #[test]
    fn test_deterministic() {
        let cfg = ChunkingConfig::default();
        let d = doc("Sujet", "Alpha beta gamma delta");
        let a = chunk_document(&d, &cfg);
        let b = chunk_document(&d, &cfg);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }
}
