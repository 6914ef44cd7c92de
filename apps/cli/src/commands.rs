//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};

use sourcestream_cache::MemoryCache;
use sourcestream_core::{Scheduler, UnitPipeline, UsageAggregator};
use sourcestream_fetcher::{Blocklist, ContentFetcher, FetcherConfig, ProxySettings};
use sourcestream_llm::{ContentCategory, OpenAiClient, QueryPlanner, Synthesizer, TextGenerator};
use sourcestream_providers::{SearchClient, TrafficClient};
use sourcestream_shared::{
    AppConfig, Event, Outline, RunContext, RunId, api_key_from_env, init_config, load_config,
    validate_required_keys,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sourcestream — research a content outline from the live web.
#[derive(Parser)]
#[command(
    name = "sourcestream",
    version,
    about = "Research every section of a content outline and stream the findings.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research an outline and stream progress events.
    Run {
        /// Path to the outline JSON file
        /// (array of {"heading": ..., "subsections": [...]}).
        #[arg(long)]
        outline: PathBuf,

        /// Primary keyword the outline was built around.
        #[arg(short, long)]
        keyword: String,

        /// ISO country code for localized search (e.g. us, uk, in).
        #[arg(short, long, default_value = "us")]
        country: String,

        /// Blog or page title for prompt context.
        #[arg(long)]
        blog_title: Option<String>,

        /// Content category steering query planning (e.g. comparative,
        /// educational). Unknown values fall back to general.
        #[arg(long, default_value = "general")]
        category: String,

        /// Print human-readable progress instead of NDJSON events.
        #[arg(long)]
        pretty: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sourcestream=info",
        1 => "sourcestream=debug",
        _ => "sourcestream=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            outline,
            keyword,
            country,
            blog_title,
            category,
            pretty,
        } => cmd_run(&outline, &keyword, &country, blog_title, &category, pretty).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn cmd_run(
    outline_path: &PathBuf,
    keyword: &str,
    country: &str,
    blog_title: Option<String>,
    category: &str,
    pretty: bool,
) -> Result<()> {
    let config = load_config()?;
    validate_required_keys(&config)?;

    let outline_raw = std::fs::read_to_string(outline_path)
        .map_err(|e| eyre!("cannot read outline '{}': {e}", outline_path.display()))?;
    let outline: Outline = serde_json::from_str(&outline_raw)
        .map_err(|e| eyre!("invalid outline JSON: {e}"))?;
    if outline.is_empty() {
        return Err(eyre!("outline has no headings"));
    }

    let ctx = RunContext {
        primary_keyword: keyword.to_string(),
        country: country.to_string(),
        blog_title,
        outline_json: serde_json::to_string(&outline)?,
        current_date: chrono::Utc::now().format("%B %d, %Y").to_string(),
    };

    let run_id = RunId::new();
    info!(
        %run_id,
        headings = outline.len(),
        keyword,
        country,
        "starting research run"
    );

    let scheduler = build_scheduler(&config, run_id, ContentCategory::from_tag(category))?;
    let mut events = scheduler.run(outline, ctx);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        if pretty {
            print_pretty(&event);
        } else {
            use std::io::Write;
            serde_json::to_writer(&mut stdout, &event)?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Component stack
// ---------------------------------------------------------------------------

/// Wire the full component stack from config: cache, blocklist, fetcher,
/// providers, generation clients, pipeline, scheduler.
fn build_scheduler(
    config: &AppConfig,
    run_id: RunId,
    category: ContentCategory,
) -> Result<Scheduler> {
    let defaults = &config.defaults;
    let cache = Arc::new(MemoryCache::new());
    let blocklist = Arc::new(Blocklist::from_config(&config.blocklist));

    let mut fetcher_config = FetcherConfig::from_defaults(defaults);
    if config.proxy.is_enabled() {
        match (
            api_key_from_env(&config.proxy.username_env),
            api_key_from_env(&config.proxy.password_env),
        ) {
            (Some(username), Some(password)) => {
                fetcher_config = fetcher_config.with_proxy(ProxySettings {
                    url: config.proxy.url.clone(),
                    username,
                    password,
                });
            }
            _ => warn!("proxy configured but credentials missing, fetching directly"),
        }
    }
    let fetcher = Arc::new(ContentFetcher::new(
        fetcher_config,
        Arc::clone(&blocklist),
        Arc::clone(&cache),
    )?);

    let search_key = api_key_from_env(&config.search.api_key_env)
        .ok_or_else(|| eyre!("search API key missing"))?;
    let search = Arc::new(SearchClient::new(
        config.search.base_url.clone(),
        search_key,
        Duration::from_secs(defaults.search_timeout_secs),
        blocklist,
    )?);

    let traffic = Arc::new(TrafficClient::new(
        config.metrics.base_url.clone(),
        api_key_from_env(&config.metrics.api_key_env),
        config.metrics.database.clone(),
        Duration::from_secs(defaults.search_timeout_secs),
        cache,
    )?);

    let openai_key = api_key_from_env(&config.openai.api_key_env)
        .ok_or_else(|| eyre!("generation API key missing"))?;
    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiClient::new(
        config.openai.base_url.clone(),
        openai_key,
        Duration::from_secs(60),
    )?);

    let planner = QueryPlanner::new(
        Arc::clone(&generator),
        config.openai.planner_model.clone(),
        category,
    );
    let synthesizer = Synthesizer::new(generator, config.openai.synthesis_model.clone());

    let usage = Arc::new(UsageAggregator::new(run_id));
    let pipeline = Arc::new(UnitPipeline::new(
        planner,
        synthesizer,
        search,
        fetcher,
        traffic,
        Arc::clone(&usage),
        defaults.results_per_query,
        Duration::from_secs(defaults.unit_deadline_secs),
    ));

    Ok(Scheduler::new(pipeline, usage))
}

// ---------------------------------------------------------------------------
// Pretty output
// ---------------------------------------------------------------------------

fn print_pretty(event: &Event) {
    let value = event.to_value();
    let status = value["status"].as_str().unwrap_or("event");
    let section = value["subsection_title"].as_str().unwrap_or("");

    match status {
        "processing_start" => {
            println!("Researching {} sections...", value["total_units"]);
        }
        "searching" => println!("  [{section}] searching"),
        "website_found" => {
            println!(
                "  [{section}] found {}",
                value["website_data"]["url"].as_str().unwrap_or("?")
            );
        }
        "found_websites" => {
            println!(
                "  [{section}] {} sources, combined traffic {}",
                value["traffic_summary"].as_array().map_or(0, Vec::len),
                value["total_traffic"]
            );
        }
        "heading_completed" | "subsection_completed" => {
            println!(
                "  [{section}] done ({} sources)",
                value["sources"].as_array().map_or(0, Vec::len)
            );
        }
        "heading_error" | "subsection_error" => {
            println!(
                "  [{section}] failed: {}",
                value["message"].as_str().unwrap_or("unknown error")
            );
        }
        "usage_recorded" => {
            println!(
                "Usage: {} calls, {} input tokens, {} output tokens",
                value["call_count"], value["input_tokens"], value["output_tokens"]
            );
        }
        "processing_complete" => {
            println!("Completed {} sections.", value["total_processed"]);
        }
        "error" => {
            println!(
                "Run failed: {}",
                value["message"].as_str().unwrap_or("unknown error")
            );
        }
        _ => println!("  {status}"),
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
