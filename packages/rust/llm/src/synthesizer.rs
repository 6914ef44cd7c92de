//! Note synthesis: one model call per unit over every fetched source.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use sourcestream_shared::{
    FetchedDocument, Result, RunContext, SourceNotes, SynthesizedNotes, UsageCall, WorkUnit,
};

use crate::client::{GenerationRequest, TextGenerator};
use crate::prompts;
use crate::repair::{repair_json, strip_code_fences};

/// What came back from synthesis: parsed notes, or the raw text when even the
/// repair pass could not make it valid. The raw fallback is still delivered to
/// the caller; a malformed response is degraded output, not a failed unit.
#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    Notes(SynthesizedNotes),
    Unparsed { raw: String, parse_error: String },
}

/// Synthesis outcome plus the billed token usage.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub outcome: SynthesisOutcome,
    pub usage: UsageCall,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    link_and_source_name: String,
    #[serde(default)]
    information: BTreeMap<String, String>,
}

/// Turns fetched documents into structured research notes.
pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Synthesize notes for `unit` from its fetched documents.
    ///
    /// Transport failure is the unit-fatal error path and propagates; a
    /// response that resists parsing is returned as `Unparsed`.
    #[instrument(skip_all, fields(section = %unit.subsection_title, sources = documents.len()))]
    pub async fn synthesize(
        &self,
        unit: &WorkUnit,
        ctx: &RunContext,
        documents: &[FetchedDocument],
    ) -> Result<SynthesisResult> {
        let request = GenerationRequest {
            model: self.model.clone(),
            system: prompts::synthesis_system_prompt().to_string(),
            user: prompts::synthesis_user_prompt(unit, ctx, documents),
        };

        let response = self.generator.generate(&request).await?;
        let usage = UsageCall {
            label: "synthesizer".into(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        Ok(SynthesisResult {
            outcome: parse_synthesis(&response.text),
            usage,
        })
    }
}

/// Strict parse, then a repair pass, then the raw fallback.
fn parse_synthesis(text: &str) -> SynthesisOutcome {
    let cleaned = strip_code_fences(text);

    let first_error = match parse_sources(&cleaned) {
        Ok(notes) => return SynthesisOutcome::Notes(notes),
        Err(e) => e,
    };

    let (repaired, changed) = repair_json(&cleaned);
    if changed {
        match parse_sources(&repaired) {
            Ok(notes) => {
                debug!("synthesis response parsed after repair");
                return SynthesisOutcome::Notes(notes);
            }
            Err(e) => warn!(error = %e, "synthesis response unparseable after repair"),
        }
    } else {
        warn!(error = %first_error, "synthesis response unparseable");
    }

    SynthesisOutcome::Unparsed {
        raw: text.to_string(),
        parse_error: first_error,
    }
}

/// Parse `Source_N` entries, ordered by their numeric suffix.
fn parse_sources(text: &str) -> std::result::Result<SynthesizedNotes, String> {
    let raw: HashMap<String, RawSource> =
        serde_json::from_str(text).map_err(|e| e.to_string())?;

    let mut entries: Vec<(u32, RawSource)> = raw
        .into_iter()
        .filter_map(|(key, source)| {
            let n = key.strip_prefix("Source_")?.parse::<u32>().ok()?;
            Some((n, source))
        })
        .collect();
    if entries.is_empty() {
        return Err("no Source_N entries in response".into());
    }
    entries.sort_by_key(|(n, _)| *n);

    Ok(SynthesizedNotes {
        sources: entries
            .into_iter()
            .map(|(_, source)| SourceNotes {
                source: source.link_and_source_name,
                facts: source.information,
            })
            .collect(),
    })
}
