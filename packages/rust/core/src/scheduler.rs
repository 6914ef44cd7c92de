//! Fan-out scheduler: one concurrent pipeline per work unit, one merged
//! event stream for the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use sourcestream_shared::{Event, EventKind, Outline, RunContext, WorkUnit};

use crate::outline::flatten_outline;
use crate::unit::{UnitPipeline, emit};
use crate::usage::UsageAggregator;

/// Poll interval on the shared event queue; a stalled run logs instead of
/// blocking indefinitely.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Event channel depth, for both the per-run queue and the caller stream.
const CHANNEL_CAPACITY: usize = 64;

/// Runs a whole outline: flattens it, fans out the unit pipelines, and merges
/// their events in arrival order. One scheduler per run.
pub struct Scheduler {
    pipeline: Arc<UnitPipeline>,
    usage: Arc<UsageAggregator>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(pipeline: Arc<UnitPipeline>, usage: Arc<UsageAggregator>) -> Self {
        Self {
            pipeline,
            usage,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Start the run and hand back the caller's event stream. Dropping the
    /// receiver cancels every in-flight unit task.
    pub fn run(self, outline: Outline, ctx: RunContext) -> mpsc::Receiver<Event> {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.drive(outline, ctx, out_tx));
        out_rx
    }

    #[instrument(skip_all, fields(run_id = %self.usage.run_id()))]
    async fn drive(self, outline: Outline, ctx: RunContext, out: mpsc::Sender<Event>) {
        let units = flatten_outline(&outline);
        let total = units.len();
        debug!(total, "outline flattened");

        if !emit(&out, EventKind::ProcessingStart { total_units: total }).await {
            return;
        }

        let ctx = Arc::new(ctx);
        let (unit_tx, mut unit_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut join_set = JoinSet::new();
        let mut identities: HashMap<tokio::task::Id, WorkUnit> = HashMap::new();

        for unit in units {
            let handle = join_set.spawn(Arc::clone(&self.pipeline).run(
                unit.clone(),
                Arc::clone(&ctx),
                unit_tx.clone(),
            ));
            identities.insert(handle.id(), unit);
        }
        // The scheduler's own sender must not keep the queue alive.
        drop(unit_tx);

        let mut terminals = 0usize;
        let mut completed = 0usize;
        while terminals < total {
            tokio::select! {
                // Caller disconnect cancels all in-flight unit work; aborted
                // tasks release their semaphore permits on drop.
                _ = out.closed() => {
                    debug!("caller disconnected, aborting unit tasks");
                    join_set.abort_all();
                    return;
                }
                received = tokio::time::timeout(self.poll_interval, unit_rx.recv()) => {
                    match received {
                        Ok(Some(event)) => {
                            if event.is_unit_terminal() {
                                terminals += 1;
                            }
                            if matches!(event.kind, EventKind::UnitCompleted { .. }) {
                                completed += 1;
                            }
                            if out.send(event).await.is_err() {
                                join_set.abort_all();
                                return;
                            }
                        }
                        Ok(None) => {
                            // Every unit task is gone. Any unit short of a
                            // terminal event died without one; report it.
                            terminals += self
                                .report_dead_units(&mut join_set, &identities, &out)
                                .await;
                            break;
                        }
                        Err(_) => {
                            debug!(terminals, total, "no unit events within poll interval");
                        }
                    }
                }
            }
        }

        // Zero successes is a reported outcome, not an exception.
        if total > 0 && completed == 0 {
            warn!(total, "every unit of the run failed");
            if !emit(
                &out,
                EventKind::RunError {
                    message: format!("all {total} units failed"),
                },
            )
            .await
            {
                return;
            }
        }

        // The single billable record, then the run terminal.
        if let Some(usage) = self.usage.finalize() {
            if !emit(&out, EventKind::UsageRecorded { usage }).await {
                return;
            }
        }
        emit(
            &out,
            EventKind::ProcessingComplete {
                total_processed: terminals,
            },
        )
        .await;
    }

    /// Convert panicked unit tasks into their units' terminal error events.
    /// Returns how many terminals were emitted.
    async fn report_dead_units(
        &self,
        join_set: &mut JoinSet<()>,
        identities: &HashMap<tokio::task::Id, WorkUnit>,
        out: &mpsc::Sender<Event>,
    ) -> usize {
        let mut reported = 0;
        while let Some(joined) = join_set.join_next_with_id().await {
            let Err(join_error) = joined else {
                continue;
            };
            let Some(unit) = identities.get(&join_error.id()) else {
                warn!(error = %join_error, "unidentified unit task failed");
                continue;
            };
            warn!(section = %unit.subsection_title, error = %join_error, "unit task died");
            if emit(
                out,
                EventKind::UnitError {
                    unit: unit.clone(),
                    message: "unit task failed unexpectedly".into(),
                },
            )
            .await
            {
                reported += 1;
            }
        }
        reported
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcestream_cache::MemoryCache;
    use sourcestream_fetcher::{Blocklist, ContentFetcher, FetcherConfig};
    use sourcestream_llm::testing::{ScriptedGenerator, StallingGenerator};
    use sourcestream_llm::{ContentCategory, QueryPlanner, Synthesizer, TextGenerator};
    use sourcestream_providers::{SearchClient, TrafficClient};
    use sourcestream_shared::{Heading, RunId};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PLANNER_REPLY: &str = r#"{
        "query_1": "solar panel benefits 2026",
        "query_2": "solar panel cost savings data",
        "query_3": "solar adoption statistics",
        "query_4": "solar panel efficiency report",
        "query_5": "residential solar trends"
    }"#;

    const SYNTHESIS_REPLY: &str = r#"{
        "Source_1": {
            "link_and_source_name": "https://a.example - Example",
            "information": {"information_1": "Solar output grew 20% year over year."}
        }
    }"#;

    fn page_body() -> String {
        format!(
            "<html><head><title>Solar Report</title></head><body><main><p>{}</p></main></body></html>",
            "Detailed solar panel research findings and data. ".repeat(10)
        )
    }

    struct Harness {
        search_server: MockServer,
        pages_server: MockServer,
        usage: Arc<UsageAggregator>,
        planner_reply: String,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                search_server: MockServer::start().await,
                pages_server: MockServer::start().await,
                usage: Arc::new(UsageAggregator::new(RunId::new())),
                planner_reply: PLANNER_REPLY.to_string(),
            }
        }

        /// Search results pointing at the pages server.
        async fn mock_search(&self, links: &[&str]) {
            let organic: Vec<serde_json::Value> = links
                .iter()
                .enumerate()
                .map(|(i, link)| {
                    let link = if link.starts_with("http") {
                        link.to_string()
                    } else {
                        format!("{}{}", self.pages_server.uri(), link)
                    };
                    serde_json::json!({"title": format!("Result {i}"), "link": link, "snippet": ""})
                })
                .collect();
            Mock::given(method("POST"))
                .and(path("/search"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(serde_json::json!({"organic": organic})),
                )
                .mount(&self.search_server)
                .await;
        }

        async fn mock_page(&self, page_path: &str, template: ResponseTemplate) {
            Mock::given(method("GET"))
                .and(path(page_path))
                .respond_with(template)
                .mount(&self.pages_server)
                .await;
        }

        fn scheduler(&self) -> Scheduler {
            self.scheduler_with_planner(
                Arc::new(ScriptedGenerator::replying(&self.planner_reply, 100, 40)),
                Duration::from_secs(30),
            )
        }

        fn scheduler_with_planner(
            &self,
            planner_generator: Arc<dyn TextGenerator>,
            deadline: Duration,
        ) -> Scheduler {
            let blocklist = Arc::new(Blocklist::new());
            let cache = Arc::new(MemoryCache::new());
            let fetcher = Arc::new(
                ContentFetcher::new(
                    FetcherConfig {
                        timeout: Duration::from_secs(5),
                        concurrency: 4,
                        max_content_chars: 10_000,
                        proxy: None,
                    },
                    Arc::clone(&blocklist),
                    Arc::clone(&cache),
                )
                .unwrap(),
            );
            let search = Arc::new(
                SearchClient::new(
                    self.search_server.uri(),
                    "test-key",
                    Duration::from_secs(5),
                    blocklist,
                )
                .unwrap(),
            );
            let traffic = Arc::new(
                TrafficClient::new(
                    "http://127.0.0.1:9", // never called without an API key
                    None,
                    "us",
                    Duration::from_secs(1),
                    cache,
                )
                .unwrap(),
            );
            let planner =
                QueryPlanner::new(planner_generator, "test-model", ContentCategory::General);
            let synthesizer = Synthesizer::new(
                Arc::new(ScriptedGenerator::replying(SYNTHESIS_REPLY, 300, 90)),
                "test-model",
            );
            let pipeline = Arc::new(UnitPipeline::new(
                planner,
                synthesizer,
                search,
                fetcher,
                traffic,
                Arc::clone(&self.usage),
                2,
                deadline,
            ));
            Scheduler::new(pipeline, Arc::clone(&self.usage))
                .with_poll_interval(Duration::from_millis(200))
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            primary_keyword: "solar panels".into(),
            country: "us".into(),
            blog_title: Some("The Solar Guide".into()),
            outline_json: r#"[{"heading":"Benefits"}]"#.into(),
            current_date: "August 27, 2026".into(),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[Event]) -> Vec<String> {
        events.iter().map(Event::status).collect()
    }

    #[tokio::test]
    async fn every_unit_gets_exactly_one_terminal() {
        let harness = Harness::new().await;
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![
            Heading {
                title: "Benefits".into(),
                subsections: vec!["Cost".into(), "Environment".into()],
            },
            Heading {
                title: "Installation".into(),
                subsections: vec![],
            },
        ]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let terminals = events.iter().filter(|e| e.is_unit_terminal()).count();
        assert_eq!(terminals, 3);

        let statuses = statuses(&events);
        assert_eq!(statuses[0], "processing_start");
        assert_eq!(statuses[statuses.len() - 2], "usage_recorded");
        assert_eq!(statuses[statuses.len() - 1], "processing_complete");
        let last = events.last().unwrap().to_value();
        assert_eq!(last["total_processed"], 3);
    }

    #[tokio::test]
    async fn direct_heading_end_to_end() {
        let harness = Harness::new().await;
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let found = statuses(&events)
            .iter()
            .position(|s| s == "website_found")
            .expect("at least one website_found");
        let terminal = events
            .iter()
            .position(Event::is_unit_terminal)
            .expect("one terminal");
        assert!(found < terminal);
        assert_eq!(events[terminal].status(), "heading_completed");
        assert_eq!(
            events[terminal].unit().unwrap().subsection_title,
            "Benefits"
        );
        assert_eq!(
            events.iter().filter(|e| e.is_unit_terminal()).count(),
            1
        );
    }

    #[tokio::test]
    async fn completed_event_carries_sources_and_notes() {
        let harness = Harness::new().await;
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let completed = events
            .iter()
            .find(|e| e.status() == "heading_completed")
            .expect("completed event")
            .to_value();
        assert_eq!(completed["sources"][0]["title"], "Solar Report");
        assert_eq!(
            completed["informations"]["sources"][0]["facts"]["information_1"],
            "Solar output grew 20% year over year."
        );
    }

    #[tokio::test]
    async fn zero_queries_is_one_error_and_no_website_found() {
        let mut harness = Harness::new().await;
        harness.planner_reply = "no structured queries today".into();
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let statuses = statuses(&events);
        assert_eq!(statuses.iter().filter(|s| *s == "heading_error").count(), 1);
        assert!(!statuses.iter().any(|s| s == "website_found"));
        let last = events.last().unwrap().to_value();
        assert_eq!(last["total_processed"], 1);
    }

    #[tokio::test]
    async fn partial_fetch_success_still_completes() {
        let harness = Harness::new().await;
        harness.mock_search(&["/good", "/missing"]).await;
        harness
            .mock_page("/good", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;
        harness
            .mock_page("/missing", ResponseTemplate::new(404))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let completed = events
            .iter()
            .find(|e| e.status() == "heading_completed")
            .expect("unit completes on partial success")
            .to_value();
        let sources = completed["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0]["url"].as_str().unwrap().ends_with("/good"));
    }

    #[tokio::test]
    async fn all_fetches_failing_is_a_counted_unit_error() {
        let harness = Harness::new().await;
        harness.mock_search(&["/gone"]).await;
        harness.mock_page("/gone", ResponseTemplate::new(404)).await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let statuses = statuses(&events);
        assert!(statuses.contains(&"heading_error".to_string()));
        assert!(!statuses.contains(&"heading_completed".to_string()));
        // A run where every unit failed reports a run-level error status
        // but still closes with usage and the completion summary.
        assert!(statuses.contains(&"error".to_string()));
        assert!(statuses.contains(&"usage_recorded".to_string()));
        let last = events.last().unwrap().to_value();
        assert_eq!(last["status"], "processing_complete");
        assert_eq!(last["total_processed"], 1);
    }

    #[tokio::test]
    async fn blocklisted_search_hits_never_surface() {
        let harness = Harness::new().await;
        harness
            .mock_search(&["https://github.com/some/repo", "/page"])
            .await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        for event in &events {
            let value = event.to_value();
            if value["status"] == "website_found" {
                assert!(
                    !value["website_data"]["url"]
                        .as_str()
                        .unwrap()
                        .contains("github.com")
                );
            }
        }
        assert!(statuses(&events).contains(&"heading_completed".to_string()));
    }

    #[tokio::test]
    async fn empty_outline_still_closes_the_run() {
        let harness = Harness::new().await;
        let events = collect(harness.scheduler().run(Outline(vec![]), ctx())).await;
        let statuses = statuses(&events);
        assert_eq!(
            statuses,
            vec!["processing_start", "usage_recorded", "processing_complete"]
        );
        let start = events[0].to_value();
        assert_eq!(start["total_units"], 0);
        let last = events.last().unwrap().to_value();
        assert_eq!(last["total_processed"], 0);
    }

    #[tokio::test]
    async fn usage_record_sums_planner_and_synthesis_calls() {
        let harness = Harness::new().await;
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let usage = events
            .iter()
            .find(|e| e.status() == "usage_recorded")
            .unwrap()
            .to_value();
        // One planner call (100/40) and one synthesis call (300/90)
        assert_eq!(usage["call_count"], 2);
        assert_eq!(usage["input_tokens"], 400);
        assert_eq!(usage["output_tokens"], 130);
    }

    #[tokio::test]
    async fn found_websites_summary_precedes_terminal() {
        let harness = Harness::new().await;
        harness.mock_search(&["/page"]).await;
        harness
            .mock_page("/page", ResponseTemplate::new(200).set_body_string(page_body()))
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let statuses = statuses(&events);
        let summary = statuses.iter().position(|s| s == "found_websites").unwrap();
        let terminal = events.iter().position(Event::is_unit_terminal).unwrap();
        assert!(summary < terminal);

        let value = events[summary].to_value();
        // Traffic degrades to zero without a metrics API key
        assert_eq!(value["total_traffic"], 0);
        assert!(value["traffic_summary"].as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn same_url_across_queries_is_fetched_and_announced_once() {
        let harness = Harness::new().await;
        // Every one of the five queries surfaces the same page.
        harness.mock_search(&["/page"]).await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_body()))
            .expect(1) // sibling queries must not re-fetch a claimed URL
            .mount(&harness.pages_server)
            .await;

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(harness.scheduler().run(outline, ctx())).await;

        let statuses = statuses(&events);
        assert_eq!(
            statuses.iter().filter(|s| *s == "website_found").count(),
            1
        );
        let completed = events
            .iter()
            .find(|e| e.status() == "heading_completed")
            .expect("unit completes")
            .to_value();
        assert_eq!(completed["sources"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stalled_unit_is_terminated_by_the_deadline() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler_with_planner(
            Arc::new(StallingGenerator::new()),
            Duration::from_millis(100),
        );

        let outline = Outline(vec![Heading {
            title: "Benefits".into(),
            subsections: vec![],
        }]);
        let events = collect(scheduler.run(outline, ctx())).await;

        let error = events
            .iter()
            .find(|e| e.status() == "heading_error")
            .expect("deadline produces the unit's terminal error")
            .to_value();
        assert!(error["message"].as_str().unwrap().contains("timed out"));
        let last = events.last().unwrap().to_value();
        assert_eq!(last["status"], "processing_complete");
        assert_eq!(last["total_processed"], 1);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_in_flight_units() {
        use std::sync::atomic::Ordering;

        let harness = Harness::new().await;
        let stalling = Arc::new(StallingGenerator::new());
        let calls = stalling.calls();
        let dropped = stalling.dropped_in_flight();
        let scheduler =
            harness.scheduler_with_planner(Arc::clone(&stalling) as _, Duration::ZERO);

        let outline = Outline(vec![
            Heading {
                title: "Benefits".into(),
                subsections: vec![],
            },
            Heading {
                title: "Installation".into(),
                subsections: vec![],
            },
        ]);
        let mut events = scheduler.run(outline, ctx());
        let first = events.recv().await.expect("run starts");
        assert_eq!(first.status(), "processing_start");

        // Both unit tasks are stalled inside their planning call.
        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(events);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }
}
