//! The per-unit research pipeline: plan, search, fetch, rank, synthesize.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use sourcestream_fetcher::ContentFetcher;
use sourcestream_llm::{QueryPlanner, SynthesisOutcome, Synthesizer};
use sourcestream_providers::{SearchClient, TrafficClient};
use sourcestream_shared::{
    CandidateSource, Event, EventKind, FetchedDocument, RunContext, SourceRef, TrafficEntry,
    WorkUnit,
};

use crate::usage::UsageAggregator;

/// One query's yield: the candidates it produced and their fetch outcomes.
struct QueryYield {
    fetched: Vec<(CandidateSource, FetchedDocument)>,
}

/// Everything one work unit needs to research itself. Shared across units;
/// all per-unit state lives on the stack of [`UnitPipeline::run`].
pub struct UnitPipeline {
    pub(crate) planner: QueryPlanner,
    pub(crate) synthesizer: Synthesizer,
    pub(crate) search: Arc<SearchClient>,
    pub(crate) fetcher: Arc<ContentFetcher>,
    pub(crate) traffic: Arc<TrafficClient>,
    pub(crate) usage: Arc<UsageAggregator>,
    /// Candidates kept per query (rank 1 and 2 by default).
    pub(crate) results_per_query: usize,
    /// Soft watchdog; `Duration::ZERO` disables it.
    pub(crate) deadline: Duration,
}

impl UnitPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: QueryPlanner,
        synthesizer: Synthesizer,
        search: Arc<SearchClient>,
        fetcher: Arc<ContentFetcher>,
        traffic: Arc<TrafficClient>,
        usage: Arc<UsageAggregator>,
        results_per_query: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            planner,
            synthesizer,
            search,
            fetcher,
            traffic,
            usage,
            results_per_query,
            deadline,
        }
    }

    /// Research one unit, streaming progress into `events` and always ending
    /// with exactly one terminal event (unless the receiver is gone).
    #[instrument(skip_all, fields(
        heading = %unit.heading_title,
        section = %unit.subsection_title,
    ))]
    pub async fn run(
        self: Arc<Self>,
        unit: WorkUnit,
        ctx: Arc<RunContext>,
        events: mpsc::Sender<Event>,
    ) {
        if self.deadline.is_zero() {
            self.process(&unit, &ctx, &events).await;
            return;
        }

        let deadline = self.deadline;
        let process = self.process(&unit, &ctx, &events);
        if tokio::time::timeout(deadline, process).await.is_err() {
            warn!(seconds = deadline.as_secs(), "unit deadline exceeded");
            emit(
                &events,
                EventKind::UnitError {
                    unit: unit.clone(),
                    message: format!("unit timed out after {}s", deadline.as_secs()),
                },
            )
            .await;
        }
    }

    async fn process(
        &self,
        unit: &WorkUnit,
        ctx: &RunContext,
        events: &mpsc::Sender<Event>,
    ) {
        if !emit(events, EventKind::Searching { unit: unit.clone() }).await {
            return;
        }

        // Step 1: plan queries. Zero queries is unit-fatal, no retry.
        let plan = self.planner.plan(unit, ctx).await;
        if let Some(call) = plan.usage.clone() {
            self.usage.record(call);
        }
        if plan.queries.is_empty() {
            emit(
                events,
                EventKind::UnitError {
                    unit: unit.clone(),
                    message: "no search queries could be generated".into(),
                },
            )
            .await;
            return;
        }

        // Steps 2+3: per-query search+fetch fan-out, pipelined so one dead
        // query never blocks the others' events.
        let fetched = self.fan_out(unit, ctx, plan.queries, events).await;

        let succeeded: Vec<(CandidateSource, FetchedDocument)> = fetched
            .into_iter()
            .filter(|(_, doc)| doc.fetch_succeeded)
            .collect();

        // Search-phase summary with traffic estimates, before selection.
        let summary = self.traffic_summary(&succeeded).await;
        let total_traffic = summary.iter().map(|entry| entry.traffic).sum();
        if !emit(
            events,
            EventKind::FoundWebsites {
                unit: unit.clone(),
                results: summary,
                total_traffic,
            },
        )
        .await
        {
            return;
        }

        // Step 4: selection. At least one fetched source is required.
        if succeeded.is_empty() {
            emit(
                events,
                EventKind::UnitError {
                    unit: unit.clone(),
                    message: "no sources could be fetched".into(),
                },
            )
            .await;
            return;
        }

        let sources: Vec<SourceRef> = succeeded
            .iter()
            .map(|(candidate, doc)| SourceRef {
                url: doc.url.clone(),
                title: doc
                    .title
                    .clone()
                    .unwrap_or_else(|| candidate.title.clone()),
            })
            .collect();
        let documents: Vec<FetchedDocument> =
            succeeded.into_iter().map(|(_, doc)| doc).collect();

        // Step 5: synthesize. Transport failure is unit-fatal; an
        // unparseable response is delivered raw.
        let result = match self.synthesizer.synthesize(unit, ctx, &documents).await {
            Ok(result) => result,
            Err(e) => {
                emit(
                    events,
                    EventKind::UnitError {
                        unit: unit.clone(),
                        message: format!("synthesis failed: {e}"),
                    },
                )
                .await;
                return;
            }
        };
        self.usage.record(result.usage);

        let informations = match result.outcome {
            SynthesisOutcome::Notes(notes) => {
                serde_json::to_value(&notes).unwrap_or_default()
            }
            SynthesisOutcome::Unparsed { raw, parse_error } => serde_json::json!({
                "raw_response": raw,
                "parse_error": parse_error,
            }),
        };

        // Step 6: terminal completion.
        emit(
            events,
            EventKind::UnitCompleted {
                unit: unit.clone(),
                sources,
                informations,
            },
        )
        .await;
    }

    /// Launch one task per query; each searches, keeps the top candidates,
    /// fetches them, and emits `website_found` for every success as it lands.
    async fn fan_out(
        &self,
        unit: &WorkUnit,
        ctx: &RunContext,
        queries: Vec<String>,
        events: &mpsc::Sender<Event>,
    ) -> Vec<(CandidateSource, FetchedDocument)> {
        let mut join_set = JoinSet::new();
        // Different queries can surface the same page; a URL is claimed here
        // before any fetch so sibling tasks never fetch or announce it twice.
        let claimed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        for (query_index, query) in queries.into_iter().enumerate() {
            let search = Arc::clone(&self.search);
            let fetcher = Arc::clone(&self.fetcher);
            let claimed = Arc::clone(&claimed);
            let unit = unit.clone();
            let country = ctx.country.clone();
            let events = events.clone();
            let results_per_query = self.results_per_query;

            join_set.spawn(async move {
                let hits = match search.search(&query, &country).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        // One failed query never blocks its siblings.
                        warn!(query = %query, error = %e, "search failed");
                        return QueryYield { fetched: Vec::new() };
                    }
                };

                let mut fetched = Vec::new();
                for (rank, hit) in hits.into_iter().take(results_per_query).enumerate() {
                    let position = rank as u32 + 1;
                    let candidate = CandidateSource {
                        url: hit.link,
                        title: hit.title,
                        snippet: hit.snippet,
                        origin_query_index: query_index,
                        rank_within_query: position,
                    };

                    let first_claim = {
                        let mut claimed =
                            claimed.lock().unwrap_or_else(|e| e.into_inner());
                        claimed.insert(candidate.url.clone())
                    };
                    if !first_claim {
                        debug!(url = %candidate.url, "candidate already claimed by a sibling query");
                        continue;
                    }

                    let doc = fetcher.fetch(&candidate.url).await;
                    if doc.fetch_succeeded {
                        let title = doc
                            .title
                            .clone()
                            .unwrap_or_else(|| candidate.title.clone());
                        emit(
                            &events,
                            EventKind::WebsiteFound {
                                unit: unit.clone(),
                                url: doc.url.clone(),
                                title,
                                position,
                            },
                        )
                        .await;
                    } else {
                        debug!(url = %candidate.url, error = ?doc.error, "candidate fetch failed");
                    }
                    fetched.push((candidate, doc));
                }
                QueryYield { fetched }
            });
        }

        let mut all = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(query_yield) => all.extend(query_yield.fetched),
                Err(e) => warn!(error = %e, "query task failed"),
            }
        }
        all
    }

    async fn traffic_summary(
        &self,
        succeeded: &[(CandidateSource, FetchedDocument)],
    ) -> Vec<TrafficEntry> {
        let mut entries = Vec::with_capacity(succeeded.len());
        for (number, (candidate, doc)) in succeeded.iter().enumerate() {
            let traffic = self.traffic.traffic_for_url(&doc.url).await;
            entries.push(TrafficEntry {
                number: number + 1,
                url: doc.url.clone(),
                title: doc
                    .title
                    .clone()
                    .unwrap_or_else(|| candidate.title.clone()),
                traffic,
            });
        }
        entries
    }
}

/// Send an event; `false` means the caller has disconnected.
pub(crate) async fn emit(events: &mpsc::Sender<Event>, kind: EventKind) -> bool {
    events.send(Event::now(kind)).await.is_ok()
}
