//! Run-level token-usage accounting.
//!
//! The aggregator is the only non-idempotent state shared by concurrent
//! units, so it is the run's sole synchronization point: a mutex around the
//! running totals and the per-call breakdown.

use std::sync::Mutex;

use tracing::debug;

use sourcestream_shared::{RunId, UsageCall, UsageRecord};

#[derive(Debug, Default)]
struct Totals {
    input_tokens: u64,
    output_tokens: u64,
    calls: Vec<UsageCall>,
    finalized: bool,
}

/// Accumulates token usage across every generation call of one run and emits
/// a single billable record.
#[derive(Debug)]
pub struct UsageAggregator {
    run_id: RunId,
    totals: Mutex<Totals>,
}

impl UsageAggregator {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            totals: Mutex::new(Totals::default()),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Record one generation call. Callable concurrently; calls recorded
    /// after finalization are dropped.
    pub fn record(&self, call: UsageCall) {
        let mut totals = self.lock();
        if totals.finalized {
            debug!(label = %call.label, "usage call after finalization dropped");
            return;
        }
        totals.input_tokens += call.input_tokens;
        totals.output_tokens += call.output_tokens;
        totals.calls.push(call);
    }

    /// Consume the totals into the run's one billable record. The second and
    /// every later call returns `None`.
    pub fn finalize(&self) -> Option<UsageRecord> {
        let mut totals = self.lock();
        if totals.finalized {
            return None;
        }
        totals.finalized = true;
        Some(UsageRecord {
            run_id: self.run_id.clone(),
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            call_count: totals.calls.len() as u64,
            calls: std::mem::take(&mut totals.calls),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Totals> {
        // A panic while holding this lock only loses usage numbers; take the
        // data as-is rather than poisoning the whole run.
        self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(label: &str, input: u64, output: u64) -> UsageCall {
        UsageCall {
            label: label.into(),
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn totals_are_additive() {
        let aggregator = UsageAggregator::new(RunId::new());
        aggregator.record(call("query_planner", 100, 30));
        aggregator.record(call("synthesizer", 400, 120));
        aggregator.record(call("query_planner", 90, 25));

        let record = aggregator.finalize().expect("first finalize");
        assert_eq!(record.input_tokens, 590);
        assert_eq!(record.output_tokens, 175);
        assert_eq!(record.call_count, 3);
        assert_eq!(record.calls.len(), 3);
    }

    #[test]
    fn totals_are_order_independent() {
        let calls = [
            call("query_planner", 10, 1),
            call("synthesizer", 20, 2),
            call("query_planner", 30, 3),
        ];

        let forward = UsageAggregator::new(RunId::new());
        for c in &calls {
            forward.record(c.clone());
        }
        let backward = UsageAggregator::new(RunId::new());
        for c in calls.iter().rev() {
            backward.record(c.clone());
        }

        let a = forward.finalize().unwrap();
        let b = backward.finalize().unwrap();
        assert_eq!(
            (a.input_tokens, a.output_tokens, a.call_count),
            (b.input_tokens, b.output_tokens, b.call_count)
        );
    }

    #[test]
    fn finalize_is_exactly_once() {
        let aggregator = UsageAggregator::new(RunId::new());
        aggregator.record(call("query_planner", 5, 5));
        assert!(aggregator.finalize().is_some());
        assert!(aggregator.finalize().is_none());
        // Late calls after finalization are dropped, not accumulated
        aggregator.record(call("synthesizer", 100, 100));
        assert!(aggregator.finalize().is_none());
    }

    #[test]
    fn concurrent_records_all_land() {
        let aggregator = std::sync::Arc::new(UsageAggregator::new(RunId::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        aggregator.record(call("query_planner", 1, 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let record = aggregator.finalize().unwrap();
        assert_eq!(record.call_count, 800);
        assert_eq!(record.input_tokens, 800);
    }
}
