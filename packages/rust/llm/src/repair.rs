//! Tolerant-parser layer for model-produced JSON.
//!
//! Models occasionally drop commas between entries or wrap the object in a
//! markdown fence despite instructions. Each rule targets one malformation
//! and is safe on valid JSON: the patterns only match where valid JSON would
//! already have had the punctuation.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*|```\s*").expect("valid regex"));

static STRING_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[ \t]*\n\s*""#).expect("valid regex"));

static OBJECT_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\}[ \t]*\n\s*""#).expect("valid regex"));

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// Remove markdown code fences around the payload.
pub fn strip_code_fences(s: &str) -> String {
    CODE_FENCE_RE.replace_all(s, "").trim().to_string()
}

/// Insert the missing comma between a string value and the key on the next
/// line. Valid JSON always has a comma there, so the bare gap never matches it.
pub fn comma_between_strings(s: &str) -> String {
    STRING_GAP_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            caps[0].replacen('"', "\",", 1)
        })
        .into_owned()
}

/// Insert the missing comma between a closing brace and the key on the next
/// line.
pub fn comma_between_objects(s: &str) -> String {
    OBJECT_GAP_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            caps[0].replacen('}', "},", 1)
        })
        .into_owned()
}

/// Drop trailing commas before a closing brace or bracket.
pub fn drop_trailing_commas(s: &str) -> String {
    TRAILING_COMMA_RE.replace_all(s, "$1").into_owned()
}

/// Apply every repair rule once. Returns the repaired text and whether any
/// rule changed it.
pub fn repair_json(s: &str) -> (String, bool) {
    let repaired = strip_code_fences(s);
    let repaired = comma_between_strings(&repaired);
    let repaired = comma_between_objects(&repaired);
    let repaired = drop_trailing_commas(&repaired);
    let changed = repaired != s;
    (repaired, changed)
}
