//! Core domain types for the outline research pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper correlating every event and usage record of one research
/// run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Outline
// ---------------------------------------------------------------------------

/// One heading of the caller's outline with its (possibly empty) subsections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heading {
    /// Heading title.
    #[serde(rename = "heading")]
    pub title: String,
    /// Ordered subsection titles. May be empty: the heading is then researched
    /// as a single unit of its own.
    #[serde(default)]
    pub subsections: Vec<String>,
}

/// The caller-supplied content outline: an ordered list of headings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outline(pub Vec<Heading>);

impl Outline {
    /// Number of headings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the outline has no headings at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// WorkUnit
// ---------------------------------------------------------------------------

/// The smallest independently researched piece of the outline: one subsection,
/// or a subsection-less heading standing in for itself.
///
/// Identity is the `(heading_index, subsection_index)` pair. Created once when
/// the outline is flattened and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub heading_index: usize,
    pub subsection_index: usize,
    pub heading_title: String,
    pub subsection_title: String,
    /// True when the heading had no subsections and doubles as its own unit.
    pub is_direct_heading: bool,
}

impl WorkUnit {
    /// The label used in wire event names: `heading` or `subsection`.
    pub fn kind_label(&self) -> &'static str {
        if self.is_direct_heading {
            "heading"
        } else {
            "subsection"
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Caller-supplied context shared by every unit of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Primary SEO keyword the outline was built around.
    pub primary_keyword: String,
    /// ISO country code for localized search (e.g. "us", "uk", "in").
    pub country: String,
    /// Optional blog/page title for prompt context.
    pub blog_title: Option<String>,
    /// The full outline serialized as JSON, given to the model for context.
    pub outline_json: String,
    /// Human-readable current date injected into planner prompts so queries
    /// favor fresh material (e.g. "August 27, 2026").
    pub current_date: String,
}

// ---------------------------------------------------------------------------
// Search / fetch results
// ---------------------------------------------------------------------------

/// A search hit selected as a fetch candidate for a work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSource {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Index of the planner query that produced this candidate (0-based).
    pub origin_query_index: usize,
    /// Rank of this hit within its query's results (1 or 2).
    pub rank_within_query: u32,
}

/// Classified cause of a failed page fetch.
///
/// Blocklist rejections happen before any network call and are counted
/// separately from network-level failures by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// 403 or anti-bot markers in the body.
    Blocked,
    /// 404 from the origin.
    NotFound,
    /// Any other non-success HTTP status.
    HttpStatus,
    /// The request exceeded the per-call timeout.
    Timeout,
    /// Connection-level failure (DNS, TLS, reset).
    Connection,
    /// Fetched, but under 100 characters of usable text.
    InsufficientContent,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blocked => "blocked",
            Self::NotFound => "not_found",
            Self::HttpStatus => "http_status",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::InsufficientContent => "insufficient_content",
        };
        f.write_str(s)
    }
}

/// The outcome of fetching one candidate URL, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Cleaned page text (empty on failure).
    pub content: String,
    pub content_length: usize,
    pub fetch_succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FetchErrorKind>,
}

impl FetchedDocument {
    /// Build a failure document for `url` with the given cause.
    pub fn failed(url: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            url: url.into(),
            title: None,
            content: String::new(),
            content_length: 0,
            fetch_succeeded: false,
            error: Some(kind),
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesized notes
// ---------------------------------------------------------------------------

/// Facts extracted from one source page, keyed by a short label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNotes {
    /// "URL - site name" as returned by the model.
    pub source: String,
    /// Label → short factual statement.
    pub facts: BTreeMap<String, String>,
}

/// Structured research notes for one work unit, grouped by source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedNotes {
    pub sources: Vec<SourceNotes>,
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Token counts for a single text-generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCall {
    /// Which component made the call (e.g. "query_planner", "synthesizer").
    pub label: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The single billable record for an entire run: grand totals plus a per-call
/// breakdown, finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub run_id: RunId,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub call_count: u64,
    pub calls: Vec<UsageCall>,
}
