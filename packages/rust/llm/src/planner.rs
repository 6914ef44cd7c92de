//! Search-query planning for one work unit.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use sourcestream_shared::{RunContext, UsageCall, WorkUnit};

use crate::client::{GenerationRequest, TextGenerator};
use crate::prompts::{self, ContentCategory};
use crate::repair::strip_code_fences;

/// Planned queries plus the token usage of the planning call, when one was
/// billed.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Diversified queries in `query_1..query_5` order. Empty means the unit
    /// cannot be researched.
    pub queries: Vec<String>,
    pub usage: Option<UsageCall>,
}

/// Asks the model for five diversified search queries per unit.
pub struct QueryPlanner {
    generator: Arc<dyn TextGenerator>,
    model: String,
    category: ContentCategory,
}

impl QueryPlanner {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        model: impl Into<String>,
        category: ContentCategory,
    ) -> Self {
        Self {
            generator,
            model: model.into(),
            category,
        }
    }

    /// Plan queries for `unit`. Any failure, transport or parse, degrades to
    /// an empty plan; zero queries is the unit-fatal signal and there is no
    /// retry.
    #[instrument(skip_all, fields(section = %unit.subsection_title))]
    pub async fn plan(&self, unit: &WorkUnit, ctx: &RunContext) -> PlanOutcome {
        let request = GenerationRequest {
            model: self.model.clone(),
            system: prompts::planner_system_prompt().to_string(),
            user: prompts::planner_user_prompt(unit, ctx, self.category),
        };

        let response = match self.generator.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "query planning call failed");
                return PlanOutcome {
                    queries: Vec::new(),
                    usage: None,
                };
            }
        };

        let usage = Some(UsageCall {
            label: "query_planner".into(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        });

        let queries = parse_queries(&response.text);
        if queries.is_empty() {
            warn!("planner response yielded no usable queries");
        } else {
            debug!(count = queries.len(), "queries planned");
        }
        PlanOutcome { queries, usage }
    }
}

/// Parse a `query_1..query_5` object into ordered, non-empty queries.
fn parse_queries(text: &str) -> Vec<String> {
    let cleaned = strip_code_fences(text);
    let Ok(value) = serde_json::from_str::<Value>(&cleaned) else {
        return Vec::new();
    };
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    (1..=5)
        .filter_map(|i| object.get(&format!("query_{i}")))
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .collect()
}
