//! Grounded answer synthesis.
//!
//! Turns the query and its top retrieval candidates into a deterministic,
//! template-based answer plus standalone source citations. Every numbered
//! statement in the answer is drawn from the candidate cited under the same
//! number, so the whole answer is traceable to its sources. A pluggable
//! [`AnswerBackend`] can replace the template composer, under the same
//! traceability contract.
//!
//! Zero candidates is a normal outcome, answered with a fixed message and an
//! empty citation list — never an error.

use crate::retrieval::Candidate;

/// Fixed response when retrieval produced no candidates.
pub const NO_RESULTS_MESSAGE: &str =
    "No relevant information was found in the archived messages for this query.";

const EXCERPT_CHARS: usize = 200;

/// A synthesized answer with its source citations, order-preserving with the
/// context the answer drew from.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<String>,
}

/// Composes answer text from the query and the context candidates.
///
/// Implementations must keep every statement traceable to at least one of
/// the numbered candidates they are given.
pub trait AnswerBackend: Send + Sync {
    fn compose(&self, query: &str, context: &[Candidate]) -> String;
}

/// Deterministic template composer: one numbered statement per candidate.
pub struct TemplateAnswerer;

impl AnswerBackend for TemplateAnswerer {
    fn compose(&self, query: &str, context: &[Candidate]) -> String {
        let mut out = format!(
            "Found {} archived message(s) relevant to \"{}\":\n\n",
            context.len(),
            query
        );

        for (i, candidate) in context.iter().enumerate() {
            let subject = if candidate.subject.is_empty() {
                "(no subject)"
            } else {
                candidate.subject.as_str()
            };
            out.push_str(&format!(
                "[{}] {} wrote about \"{}\" on {}: \"{}\"\n",
                i + 1,
                candidate.from,
                subject,
                format_date(candidate),
                excerpt(&candidate.snippet),
            ));
        }

        out.push_str(
            "\nEach numbered statement above is drawn from the source cited under the same number.",
        );
        out
    }
}

/// Assembles the context window and delegates composition to the backend.
pub struct AnswerSynthesizer {
    max_context: usize,
    backend: Box<dyn AnswerBackend>,
}

impl AnswerSynthesizer {
    pub fn new(max_context: usize) -> Self {
        Self::with_backend(max_context, Box::new(TemplateAnswerer))
    }

    pub fn with_backend(max_context: usize, backend: Box<dyn AnswerBackend>) -> Self {
        Self {
            max_context: max_context.max(1),
            backend,
        }
    }

    /// Produce `(answer, citations)` from ranked candidates.
    pub fn synthesize(&self, query: &str, candidates: &[Candidate]) -> Answer {
        if candidates.is_empty() {
            return Answer {
                text: NO_RESULTS_MESSAGE.to_string(),
                citations: Vec::new(),
            };
        }

        let context = &candidates[..self.max_context.min(candidates.len())];
        let text = self.backend.compose(query, context);
        let citations = context.iter().map(format_citation).collect();

        Answer { text, citations }
    }
}

/// Render one candidate as a standalone display block.
pub fn format_citation(candidate: &Candidate) -> String {
    let mut block = format!("From: {}\n", candidate.from);
    block.push_str(&format!("To: {}\n", candidate.to.join("; ")));
    block.push_str(&format!("Subject: {}\n", candidate.subject));
    block.push_str(&format!("Date: {}\n", format_date(candidate)));
    if !candidate.mailbox.is_empty() {
        block.push_str(&format!("Mailbox: {}\n", candidate.mailbox));
    }
    block.push_str(&format!("Excerpt: \"{}\"", excerpt(&candidate.snippet)));
    block
}

fn format_date(candidate: &Candidate) -> String {
    candidate
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "undated".to_string())
}

fn excerpt(text: &str) -> String {
    let cleaned = text.replace('\n', " ");
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::retrieval::MatchOrigin;
    use chrono::TimeZone;

    fn candidate(id: &str, subject: &str, snippet: &str) -> Candidate {
        Candidate {
            document_id: id.into(),
            chunk_id: None,
            score: 1.0,
            origin: MatchOrigin::Hybrid,
            snippet: snippet.into(),
            from: "marie@example.org".into(),
            to: vec!["jean@example.org".into()],
            subject: subject.into(),
            date: Some(chrono::Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()),
            mailbox: "mailbox_1".into(),
            direction: Direction::Sent,
        }
    }

    #[test]
    fn test_empty_candidates_fixed_message() {
        let synth = AnswerSynthesizer::new(3);
        let answer = synth.synthesize("anything", &[]);
        assert_eq!(answer.text, NO_RESULTS_MESSAGE);
        assert!(answer.citations.is_empty());
    }

    #[test]
    fn test_answer_references_every_citation() {
        let synth = AnswerSynthesizer::new(3);
        let candidates = vec![
            candidate("m1", "Budget", "le budget prévisionnel"),
            candidate("m2", "Inventaire", "inventaire des fonds"),
        ];
        let answer = synth.synthesize("budget", &candidates);
        assert_eq!(answer.citations.len(), 2);
        for i in 1..=answer.citations.len() {
            assert!(
                answer.text.contains(&format!("[{}]", i)),
                "answer text missing reference [{}]",
                i
            );
        }
    }

    #[test]
    fn test_max_context_trims() {
        let synth = AnswerSynthesizer::new(2);
        let candidates = vec![
            candidate("m1", "a", "x"),
            candidate("m2", "b", "y"),
            candidate("m3", "c", "z"),
        ];
        let answer = synth.synthesize("q", &candidates);
        assert_eq!(answer.citations.len(), 2);
        assert!(!answer.text.contains("[3]"));
    }

    #[test]
    fn test_citations_preserve_order() {
        let synth = AnswerSynthesizer::new(3);
        let candidates = vec![
            candidate("m1", "Premier", "un"),
            candidate("m2", "Second", "deux"),
        ];
        let answer = synth.synthesize("q", &candidates);
        assert!(answer.citations[0].contains("Premier"));
        assert!(answer.citations[1].contains("Second"));
    }

    #[test]
    fn test_citation_block_fields() {
        let block = format_citation(&candidate("m1", "Budget", "le budget"));
        assert!(block.contains("From: marie@example.org"));
        assert!(block.contains("To: jean@example.org"));
        assert!(block.contains("Subject: Budget"));
        assert!(block.contains("Date: 2024-05-10"));
        assert!(block.contains("Excerpt: \"le budget\""));
    }

    #[test]
    fn test_excerpt_truncated() {
        let long = "mot ".repeat(100);
        let e = excerpt(&long);
        assert!(e.chars().count() <= EXCERPT_CHARS + 3);
        assert!(e.ends_with("..."));
    }

    #[test]
    fn test_deterministic() {
        let synth = AnswerSynthesizer::new(3);
        let candidates = vec![candidate("m1", "Budget", "le budget")];
        let a = synth.synthesize("budget", &candidates);
        let b = synth.synthesize("budget", &candidates);
        assert_eq!(a.text, b.text);
        assert_eq!(a.citations, b.citations);
    }
}
