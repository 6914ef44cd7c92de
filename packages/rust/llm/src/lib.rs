//! Text-generation layer: client abstraction, prompt builders, the query
//! planner, the note synthesizer, and the JSON repair pass that sits between
//! the model and the parser.

pub mod client;
pub mod planner;
pub mod prompts;
pub mod repair;
pub mod synthesizer;
pub mod testing;

pub use client::{GenerationRequest, GenerationResponse, OpenAiClient, TextGenerator};
pub use planner::{PlanOutcome, QueryPlanner};
pub use prompts::ContentCategory;
pub use synthesizer::{SynthesisOutcome, SynthesisResult, Synthesizer};
