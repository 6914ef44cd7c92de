//! Shared types, error model, and configuration for Sourcestream.
//!
//! This crate is the foundation depended on by all other Sourcestream crates.
//! It provides:
//! - [`SourcestreamError`] — the unified error type
//! - Domain types ([`Outline`], [`WorkUnit`], [`FetchedDocument`], [`UsageRecord`], [`RunId`])
//! - The streamed [`Event`] wire format
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BlocklistConfig, DefaultsConfig, MetricsConfig, OpenAiConfig, ProxyConfig,
    SearchConfig, api_key_from_env, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_required_keys,
};
pub use error::{Result, SourcestreamError};
pub use events::{Event, EventKind, SourceRef, TrafficEntry};
pub use types::{
    CandidateSource, FetchErrorKind, FetchedDocument, Heading, Outline, RunContext, RunId,
    SourceNotes, SynthesizedNotes, UsageCall, UsageRecord, WorkUnit,
};
