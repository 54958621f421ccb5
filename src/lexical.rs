//! Field-scoped, filtered, fuzzy lexical index over message records.
//!
//! One [`LexicalRecord`] per document, rebuilt wholesale on re-indexing.
//! Queries select fields (subject weighted above body), apply typed filter
//! predicates (logical AND), bound by date range, and tolerate per-term edit
//! distance. An empty query with at least one filter or date bound is browse
//! mode: every passing record is returned at a uniform score.
//!
//! Ranking: matched field weight × term coverage, descending, with ties
//! broken by descending timestamp then ascending document id.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::models::{Direction, Document};

/// Uniform score assigned to browse-mode (filter-only) results.
pub const BROWSE_SCORE: f64 = 1.0;

// ============ Query vocabulary ============

/// Searchable record attributes. Unknown field *names* only exist at the
/// string boundary; [`SearchField::parse`] ignores them there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Subject,
    Body,
    FromName,
    ToName,
    FromAddr,
    ToAddr,
}

impl SearchField {
    pub fn all() -> &'static [SearchField] {
        &[
            SearchField::Subject,
            SearchField::Body,
            SearchField::FromName,
            SearchField::ToName,
            SearchField::FromAddr,
            SearchField::ToAddr,
        ]
    }

    /// Subject matches rank above body-only matches at equal coverage.
    pub fn weight(&self) -> f64 {
        match self {
            SearchField::Subject => 2.0,
            _ => 1.0,
        }
    }

    /// Tolerant name lookup for string frontends. Unknown names yield `None`
    /// and are skipped rather than rejected.
    pub fn parse(name: &str) -> Option<SearchField> {
        match name.to_ascii_lowercase().as_str() {
            "subject" => Some(SearchField::Subject),
            "body" => Some(SearchField::Body),
            "from_name" | "from-name" => Some(SearchField::FromName),
            "to_name" | "to-name" => Some(SearchField::ToName),
            "from" | "from_addr" => Some(SearchField::FromAddr),
            "to" | "to_addr" => Some(SearchField::ToAddr),
            _ => None,
        }
    }
}

/// Closed set of filter predicates. A record must satisfy every filter to be
/// eligible, regardless of text match.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Direction(Direction),
    /// Exact (case-insensitive) sender address.
    Sender(String),
    /// Exact (case-insensitive) recipient address, in To or Cc.
    Recipient(String),
    HasAttachments(bool),
    Mailbox(String),
}

/// Inclusive start, inclusive-or-exclusive end, on the document timestamp.
/// Records without a timestamp never pass an active range.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub end_inclusive: bool,
}

impl DateRange {
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(EngineError::Validation(format!(
                    "date range start {} is after end {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    fn contains(&self, ts: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if ts < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if self.end_inclusive {
                if ts > end {
                    return false;
                }
            } else if ts >= end {
                return false;
            }
        }
        true
    }
}

/// Edit-distance tolerance for term matching. `Auto` scales with term length
/// so short tokens stay exact: 0–2 chars → 0 edits, 3–5 → 1, 6+ → 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fuzziness {
    #[default]
    Exact,
    One,
    Two,
    Auto,
}

impl Fuzziness {
    pub fn max_edits(&self, term_chars: usize) -> usize {
        match self {
            Fuzziness::Exact => 0,
            Fuzziness::One => 1,
            Fuzziness::Two => 2,
            Fuzziness::Auto => match term_chars {
                0..=2 => 0,
                3..=5 => 1,
                _ => 2,
            },
        }
    }
}

impl std::str::FromStr for Fuzziness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "exact" => Ok(Fuzziness::Exact),
            "1" => Ok(Fuzziness::One),
            "2" => Ok(Fuzziness::Two),
            "auto" => Ok(Fuzziness::Auto),
            other => Err(format!("unknown fuzziness: {} (use 0, 1, 2, or auto)", other)),
        }
    }
}

/// One lexical search invocation.
#[derive(Debug, Clone)]
pub struct LexicalQuery {
    pub text: String,
    /// `None` selects all fields.
    pub fields: Option<Vec<SearchField>>,
    pub filters: Vec<Filter>,
    pub date_range: Option<DateRange>,
    pub fuzziness: Fuzziness,
    pub limit: usize,
}

impl LexicalQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            fields: None,
            filters: Vec::new(),
            date_range: None,
            fuzziness: Fuzziness::default(),
            limit,
        }
    }
}

/// A scored lexical match.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub document_id: String,
    pub score: f64,
    /// Field that produced the best score; `None` for browse-mode hits.
    pub matched_field: Option<SearchField>,
    pub snippet: String,
}

// ============ Records ============

/// Per-document projection of searchable and filterable attributes.
#[derive(Debug, Clone)]
pub struct LexicalRecord {
    pub document_id: String,
    pub from_addr: String,
    pub from_name: String,
    pub to_addrs: Vec<String>,
    pub cc_addrs: Vec<String>,
    pub to_names: Vec<String>,
    pub subject: String,
    pub body_preview: String,
    pub date: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub has_attachments: bool,
    pub mailbox: String,

    subject_norm: String,
    body_norm: String,
    from_name_norm: String,
    to_names_norm: String,
    from_addr_norm: String,
    to_addrs_norm: String,
}

impl LexicalRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        from_addr: String,
        to_addrs: Vec<String>,
        cc_addrs: Vec<String>,
        subject: String,
        body: &str,
        date: Option<DateTime<Utc>>,
        direction: Direction,
        has_attachments: bool,
        mailbox: String,
    ) -> Self {
        let from_name = extract_name(&from_addr);
        let to_names: Vec<String> = to_addrs
            .iter()
            .chain(cc_addrs.iter())
            .map(|a| extract_name(a))
            .collect();

        let body_preview: String = body.chars().take(240).collect();
        let subject_norm = subject.to_lowercase();
        let body_norm = body.to_lowercase();
        let from_name_norm = from_name.to_lowercase();
        let to_names_norm = to_names.join("; ").to_lowercase();
        let from_addr_norm = from_addr.to_lowercase();
        let to_addrs_norm = to_addrs
            .iter()
            .chain(cc_addrs.iter())
            .map(|a| a.to_lowercase())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            document_id,
            from_addr,
            from_name,
            to_addrs,
            cc_addrs,
            to_names,
            subject,
            body_preview,
            date,
            direction,
            has_attachments,
            mailbox,
            subject_norm,
            body_norm,
            from_name_norm,
            to_names_norm,
            from_addr_norm,
            to_addrs_norm,
        }
    }

    pub fn from_document(doc: &Document) -> Self {
        Self::new(
            doc.id.clone(),
            doc.from.clone(),
            doc.to.clone(),
            doc.cc.clone(),
            doc.subject.clone(),
            &doc.body,
            doc.date,
            doc.direction,
            doc.has_attachments,
            doc.mailbox.clone(),
        )
    }

    fn field_text(&self, field: SearchField) -> &str {
        match field {
            SearchField::Subject => &self.subject_norm,
            SearchField::Body => &self.body_norm,
            SearchField::FromName => &self.from_name_norm,
            SearchField::ToName => &self.to_names_norm,
            SearchField::FromAddr => &self.from_addr_norm,
            SearchField::ToAddr => &self.to_addrs_norm,
        }
    }

    /// Whether this record satisfies every filter and the date range.
    pub fn passes(&self, filters: &[Filter], date_range: Option<&DateRange>) -> bool {
        for filter in filters {
            let ok = match filter {
                Filter::Direction(d) => self.direction == *d,
                Filter::Sender(addr) => self.from_addr_norm == addr.to_lowercase(),
                Filter::Recipient(addr) => {
                    let needle = addr.to_lowercase();
                    self.to_addrs
                        .iter()
                        .chain(self.cc_addrs.iter())
                        .any(|a| a.to_lowercase() == needle)
                }
                Filter::HasAttachments(flag) => self.has_attachments == *flag,
                Filter::Mailbox(name) => self.mailbox == *name,
            };
            if !ok {
                return false;
            }
        }

        if let Some(range) = date_range {
            match self.date {
                Some(ts) => range.contains(ts),
                None => false,
            }
        } else {
            true
        }
    }

    fn snippet(&self) -> String {
        if !self.subject.is_empty() {
            self.subject.clone()
        } else {
            self.body_preview.clone()
        }
    }
}

/// Extract a display name from an address string.
///
/// `"Jane Doe <jane@example.org>"` yields `Jane Doe`; a bare address yields
/// the local part title-cased with `.`/`_` treated as word separators.
pub fn extract_name(addr: &str) -> String {
    let trimmed = addr.trim();
    if let Some(lt) = trimmed.find('<') {
        let name = trimmed[..lt].trim().trim_matches('"').trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let local = trimmed
        .trim_matches(|c| c == '<' || c == '>' || c == '"')
        .split('@')
        .next()
        .unwrap_or("");

    if local.is_empty() {
        return trimmed.to_string();
    }

    local
        .split(|c| c == '.' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============ Index ============

/// In-memory lexical index: one record per document id.
pub struct LexicalIndex {
    records: Vec<LexicalRecord>,
}

impl LexicalIndex {
    pub fn from_records(records: Vec<LexicalRecord>) -> Self {
        Self { records }
    }

    pub fn from_documents(docs: &[Document]) -> Self {
        Self {
            records: docs.iter().map(LexicalRecord::from_document).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LexicalRecord] {
        &self.records
    }

    pub fn get(&self, document_id: &str) -> Option<&LexicalRecord> {
        self.records.iter().find(|r| r.document_id == document_id)
    }

    /// Run one lexical query. See the module docs for ranking semantics.
    pub fn search(&self, query: &LexicalQuery) -> Result<Vec<LexicalHit>> {
        if let Some(range) = &query.date_range {
            range.validate()?;
        }

        // Tokenize the same way field words are tokenized, so punctuation
        // in the query ("meeting?") cannot defeat a match.
        let terms: Vec<String> = query
            .text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let browse = terms.is_empty();
        if browse && query.filters.is_empty() && query.date_range.is_none() {
            return Ok(Vec::new());
        }

        let default_fields = SearchField::all().to_vec();
        let fields = query.fields.as_ref().unwrap_or(&default_fields);

        let mut hits: Vec<(&LexicalRecord, LexicalHit)> = Vec::new();

        for record in &self.records {
            if !record.passes(&query.filters, query.date_range.as_ref()) {
                continue;
            }

            if browse {
                hits.push((
                    record,
                    LexicalHit {
                        document_id: record.document_id.clone(),
                        score: BROWSE_SCORE,
                        matched_field: None,
                        snippet: record.snippet(),
                    },
                ));
                continue;
            }

            let mut best_score = 0.0;
            let mut best_field = None;
            for &field in fields {
                let text = record.field_text(field);
                let matched = terms
                    .iter()
                    .filter(|t| term_matches(text, t, query.fuzziness))
                    .count();
                if matched == 0 {
                    continue;
                }
                let score = field.weight() * matched as f64 / terms.len() as f64;
                if score > best_score {
                    best_score = score;
                    best_field = Some(field);
                }
            }

            if let Some(field) = best_field {
                hits.push((
                    record,
                    LexicalHit {
                        document_id: record.document_id.clone(),
                        score: best_score,
                        matched_field: Some(field),
                        snippet: record.snippet(),
                    },
                ));
            }
        }

        // Score desc, timestamp desc (undated last), document id asc.
        hits.sort_by(|(ra, a), (rb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rb.date.cmp(&ra.date))
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        let mut results: Vec<LexicalHit> = hits.into_iter().map(|(_, h)| h).collect();
        results.truncate(query.limit);
        Ok(results)
    }
}

/// A term matches a field when it occurs as a substring, or — under an edit
/// tolerance — when any whole word of the field is within that many edits.
fn term_matches(text_norm: &str, term_norm: &str, fuzziness: Fuzziness) -> bool {
    if text_norm.contains(term_norm) {
        return true;
    }

    let max_edits = fuzziness.max_edits(term_norm.chars().count());
    if max_edits == 0 {
        return false;
    }

    text_norm
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| levenshtein_within(word, term_norm, max_edits))
}

/// Bounded Levenshtein: true when `a` and `b` are within `max` edits.
/// Bails out early once a whole DP row exceeds the bound.
fn levenshtein_within(a: &str, b: &str, max: usize) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.len().abs_diff(b.len()) > max {
        return false;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut cur = Vec::with_capacity(b.len() + 1);
        cur.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur.push((prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1));
        }
        if cur.iter().min().copied().unwrap_or(0) > max {
            return false;
        }
        prev = cur;
    }

    prev[b.len()] <= max
}
