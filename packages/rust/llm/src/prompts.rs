//! Prompt builders for query planning and source synthesis.
//!
//! Category-specific guidance is dispatched through a closed enum and a
//! static lookup table instead of string comparisons: an unknown tag falls
//! back to [`ContentCategory::General`] rather than silently changing the
//! prompt shape.

use sourcestream_shared::{FetchedDocument, RunContext, WorkUnit};

/// Per-source content cap inside the synthesis prompt.
pub const SOURCE_CONTENT_CHARS: usize = 1_500;

// ---------------------------------------------------------------------------
// Content categories
// ---------------------------------------------------------------------------

/// Editorial angle of the content being researched. Steers query planning
/// toward the kind of sources that angle needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentCategory {
    #[default]
    General,
    ActionOriented,
    AudienceBased,
    BenefitFocused,
    Comparative,
    Educational,
    Evaluative,
    Explanatory,
    ProblemSolving,
    Predictive,
    Strategic,
}

/// Tag-to-category table; also the authoritative list of accepted tags.
const CATEGORY_TAGS: &[(&str, ContentCategory)] = &[
    ("general", ContentCategory::General),
    ("action-oriented", ContentCategory::ActionOriented),
    ("audience-based", ContentCategory::AudienceBased),
    ("benefit-focused", ContentCategory::BenefitFocused),
    ("comparative", ContentCategory::Comparative),
    ("educational", ContentCategory::Educational),
    ("evaluative", ContentCategory::Evaluative),
    ("exploratory", ContentCategory::Evaluative),
    ("explanatory", ContentCategory::Explanatory),
    ("problem-solving", ContentCategory::ProblemSolving),
    ("predictive", ContentCategory::Predictive),
    ("strategic", ContentCategory::Strategic),
];

impl ContentCategory {
    /// Parse a category tag, case-insensitive. Unknown tags are `General`.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        CATEGORY_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    /// Guidance fragment appended to the planner prompt.
    fn guidance(self) -> &'static str {
        match self {
            Self::General => "",
            Self::ActionOriented => {
                "Favor queries that surface step-by-step guides, checklists, and implementation walkthroughs."
            }
            Self::AudienceBased => {
                "Favor queries that surface audience-specific or region-specific data and examples."
            }
            Self::BenefitFocused => {
                "Favor queries that surface measured benefits, outcomes, and supporting statistics."
            }
            Self::Comparative => {
                "Favor queries that surface head-to-head comparisons, alternatives, and benchmark data."
            }
            Self::Educational => {
                "Favor queries that surface authoritative explainers, definitions, and primary references."
            }
            Self::Evaluative => {
                "Favor queries that surface reviews, expert assessments, and pros-and-cons analyses."
            }
            Self::Explanatory => {
                "Favor queries that surface mechanisms, causes, and how-it-works material."
            }
            Self::ProblemSolving => {
                "Favor queries that surface common problems, failure modes, and documented fixes."
            }
            Self::Predictive => {
                "Favor queries that surface forecasts, trend reports, and recent market data."
            }
            Self::Strategic => {
                "Favor queries that surface case studies, frameworks, and industry analyses."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Planner prompts
// ---------------------------------------------------------------------------

pub fn planner_system_prompt() -> &'static str {
    "You are an expert SEO research specialist who generates highly effective search queries \
     to find the best web sources. You understand search engine optimization, user intent, and \
     how to craft queries that return authoritative, comprehensive results."
}

/// User prompt asking for exactly five diversified short-tail queries as a
/// `query_1`..`query_5` JSON object.
pub fn planner_user_prompt(
    unit: &WorkUnit,
    ctx: &RunContext,
    category: ContentCategory,
) -> String {
    let mut guidance = String::new();
    let fragment = category.guidance();
    if !fragment.is_empty() {
        guidance = format!("\n{fragment}");
    }

    format!(
        r#"Input:
Outline: {outline}
Heading: {heading}
Section to research: {section}
Primary keyword: {keyword}

What you must keep in mind: information must be specific to this section but tied to the overall outline as well. You must give exactly 5 queries. All five queries must be diverse but not too far away from the section. The queries must not be around extremely basic information you already have, but rather information which deserves real-time research. In case a query can be framed better using the location, the reader is in the {country} country. Today's date is {date}.{guidance}
Ensure that the queries are short-tail, as very long queries do not return good search results.

Respond with ONLY a JSON object in this exact format:
{{
  "query_1": "query angle 1",
  "query_2": "query angle 2",
  "query_3": "query angle 3",
  "query_4": "query angle 4",
  "query_5": "query angle 5"
}}"#,
        outline = ctx.outline_json,
        heading = unit.heading_title,
        section = unit.subsection_title,
        keyword = ctx.primary_keyword,
        country = ctx.country,
        date = ctx.current_date,
    )
}

// ---------------------------------------------------------------------------
// Synthesis prompts
// ---------------------------------------------------------------------------

pub fn synthesis_system_prompt() -> &'static str {
    r#"Role: You are an expert researcher who specialises in extracting relevant information from scraped web pages.
Goals: extract information in the specified output format.

Process:
1. Understand the section for which you have to extract information.
2. Read every scraped page.
3. Determine whether the contents have relevant information for the section.
4. If relevant information is found and it is complex, break it down into pointers; otherwise keep it whole. Each pointer must be meaningfully substantial and complete in itself, and all pointers must be clearly differentiated from each other.

Output: no additional commentary. State the main point first, details after. Do not include ```json fences.
Provide your response in this exact JSON format:
{
  "Source_1": {
    "link_and_source_name": "URL of source 1 - Website/Source name",
    "information": {
      "information_1": "Information 1",
      "information_2": "Information 2",
      "information_n": "Information n"
    }
  },
  "Source_n": {
    "link_and_source_name": "URL of source n - Website/Source name",
    "information": {
      "information_1": "Information 1",
      "information_n": "Information n"
    }
  }
}"#
}

/// User prompt carrying every successfully fetched source, each truncated to
/// [`SOURCE_CONTENT_CHARS`].
pub fn synthesis_user_prompt(
    unit: &WorkUnit,
    ctx: &RunContext,
    documents: &[FetchedDocument],
) -> String {
    let mut sources = String::new();
    for (i, doc) in documents.iter().enumerate() {
        let title = doc.title.as_deref().unwrap_or("Untitled");
        sources.push_str(&format!(
            "\nSOURCE {n}: {url} - {title}\nCONTENT:\n{content}\n",
            n = i + 1,
            url = doc.url,
            content = truncate_chars(&doc.content, SOURCE_CONTENT_CHARS),
        ));
    }

    format!(
        "Input:\nSection where this information will be used: {section}\nOutline:\n{outline}\n\nSources data:\n{sources}",
        section = unit.subsection_title,
        outline = ctx.outline_json,
    )
}

/// Truncate on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
