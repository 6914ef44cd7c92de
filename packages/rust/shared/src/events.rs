//! Progress events streamed to the caller.
//!
//! Each event serializes to a flat key/value record whose `status` field names
//! it on the wire. Unit-scoped events carry the `(heading_index,
//! subsection_index)` identity so the caller can map results back onto the
//! outline, and completion/error event names vary by unit kind
//! (`heading_completed` vs `subsection_completed`).

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};

use crate::types::{UsageRecord, WorkUnit};

/// One row of the `found_websites` traffic summary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrafficEntry {
    /// 1-based position in the summary.
    pub number: usize,
    pub url: String,
    pub title: String,
    /// Estimated monthly domain traffic (0 when unknown).
    pub traffic: u64,
}

/// A source that contributed to a completed unit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
}

/// The payload of a progress event, before timestamping.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A unit has started planning and searching.
    Searching { unit: WorkUnit },
    /// Search-phase summary for a unit, with per-result traffic estimates.
    FoundWebsites {
        unit: WorkUnit,
        results: Vec<TrafficEntry>,
        total_traffic: u64,
    },
    /// The run has flattened the outline and launched its units.
    ProcessingStart { total_units: usize },
    /// One candidate page fetched successfully for a unit.
    WebsiteFound {
        unit: WorkUnit,
        url: String,
        title: String,
        /// Rank of the hit within its query (1 or 2).
        position: u32,
    },
    /// Terminal: the unit finished with synthesized notes.
    UnitCompleted {
        unit: WorkUnit,
        sources: Vec<SourceRef>,
        /// Structured notes, or a `raw_response`/`parse_error` payload when
        /// synthesis output could not be parsed even after repair.
        informations: serde_json::Value,
    },
    /// Terminal: the unit failed (no queries, no sources, or generation error).
    UnitError { unit: WorkUnit, message: String },
    /// The run's single billable usage record.
    UsageRecorded { usage: UsageRecord },
    /// Terminal for the run: every unit has produced its terminal event.
    ProcessingComplete { total_processed: usize },
    /// Terminal for the run: scheduler-level failure before/while streaming.
    RunError { message: String },
}

/// A timestamped progress event.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    /// Wrap an [`EventKind`] with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The wire `status` value for this event.
    pub fn status(&self) -> String {
        match &self.kind {
            EventKind::Searching { .. } => "searching".into(),
            EventKind::FoundWebsites { .. } => "found_websites".into(),
            EventKind::ProcessingStart { .. } => "processing_start".into(),
            EventKind::WebsiteFound { .. } => "website_found".into(),
            EventKind::UnitCompleted { unit, .. } => format!("{}_completed", unit.kind_label()),
            EventKind::UnitError { unit, .. } => format!("{}_error", unit.kind_label()),
            EventKind::UsageRecorded { .. } => "usage_recorded".into(),
            EventKind::ProcessingComplete { .. } => "processing_complete".into(),
            EventKind::RunError { .. } => "error".into(),
        }
    }

    /// True for the two per-unit terminal events the scheduler counts.
    pub fn is_unit_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::UnitCompleted { .. } | EventKind::UnitError { .. }
        )
    }

    /// The unit this event is scoped to, if any.
    pub fn unit(&self) -> Option<&WorkUnit> {
        match &self.kind {
            EventKind::Searching { unit }
            | EventKind::FoundWebsites { unit, .. }
            | EventKind::WebsiteFound { unit, .. }
            | EventKind::UnitCompleted { unit, .. }
            | EventKind::UnitError { unit, .. } => Some(unit),
            _ => None,
        }
    }

    /// Serialize to the flat wire record.
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("status".into(), self.status().into());

        if let Some(unit) = self.unit() {
            map.insert("heading_index".into(), unit.heading_index.into());
            map.insert("subsection_index".into(), unit.subsection_index.into());
            map.insert("heading_title".into(), unit.heading_title.clone().into());
            map.insert(
                "subsection_title".into(),
                unit.subsection_title.clone().into(),
            );
            map.insert("is_direct_heading".into(), unit.is_direct_heading.into());
        }

        match &self.kind {
            EventKind::Searching { .. } => {}
            EventKind::FoundWebsites {
                results,
                total_traffic,
                ..
            } => {
                map.insert(
                    "traffic_summary".into(),
                    serde_json::to_value(results).unwrap_or_default(),
                );
                map.insert("total_traffic".into(), (*total_traffic).into());
            }
            EventKind::ProcessingStart { total_units } => {
                map.insert("total_units".into(), (*total_units).into());
            }
            EventKind::WebsiteFound {
                url,
                title,
                position,
                ..
            } => {
                map.insert(
                    "website_data".into(),
                    serde_json::json!({
                        "url": url,
                        "title": title,
                        "position": position,
                    }),
                );
            }
            EventKind::UnitCompleted {
                sources,
                informations,
                ..
            } => {
                map.insert(
                    "sources".into(),
                    serde_json::to_value(sources).unwrap_or_default(),
                );
                map.insert("informations".into(), informations.clone());
            }
            EventKind::UnitError { message, .. } => {
                map.insert("message".into(), message.clone().into());
            }
            EventKind::UsageRecorded { usage } => {
                map.insert("run_id".into(), usage.run_id.to_string().into());
                map.insert("input_tokens".into(), usage.input_tokens.into());
                map.insert("output_tokens".into(), usage.output_tokens.into());
                map.insert("call_count".into(), usage.call_count.into());
                map.insert(
                    "calls".into(),
                    serde_json::to_value(&usage.calls).unwrap_or_default(),
                );
            }
            EventKind::ProcessingComplete { total_processed } => {
                map.insert("total_processed".into(), (*total_processed).into());
            }
            EventKind::RunError { message } => {
                map.insert("message".into(), message.clone().into());
            }
        }

        map.insert("timestamp".into(), self.timestamp.to_rfc3339().into());
        serde_json::Value::Object(map)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
