//! Content fetcher: retrieves and cleans page text for the research pipeline.
//!
//! Every fetch goes through a global concurrency semaphore (the egress
//! proxy is a shared resource, independent of how many work units are in
//! flight), a per-call timeout, a read-through content cache keyed by a hash
//! of the URL, and the domain blocklist. Page-level failures are classified
//! into [`FetchErrorKind`] and returned inside the document instead of as
//! errors: a dead candidate page is data, not a pipeline failure.

pub mod blocklist;
pub mod extract;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Proxy, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

use sourcestream_cache::{MemoryCache, PAGE_TTL, content_key};
use sourcestream_shared::{
    DefaultsConfig, FetchErrorKind, FetchedDocument, Result, SourcestreamError,
};

pub use blocklist::Blocklist;

/// Browser-like User-Agent; several origins refuse obvious bot agents.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Minimum usable body/text length in characters.
const MIN_CONTENT_CHARS: usize = 100;

/// Anti-bot interstitial markers checked on thin responses.
const BOT_MARKERS: &[&str] = &["captcha", "cloudflare", "access denied", "blocked"];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Credentials and endpoint for the egress proxy.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Runtime fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Per-fetch timeout.
    pub timeout: Duration,
    /// Global ceiling on simultaneous fetches.
    pub concurrency: usize,
    /// Cap on extracted text length.
    pub max_content_chars: usize,
    /// Optional egress proxy.
    pub proxy: Option<ProxySettings>,
}

impl FetcherConfig {
    /// Build from the `[defaults]` config section, without a proxy.
    pub fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(defaults.fetch_timeout_secs),
            concurrency: defaults.fetch_concurrency,
            max_content_chars: defaults.max_content_chars,
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

// ---------------------------------------------------------------------------
// ContentFetcher
// ---------------------------------------------------------------------------

/// Shared page fetcher with cache, blocklist, and a global fetch ceiling.
pub struct ContentFetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
    cache: Arc<MemoryCache>,
    blocklist: Arc<Blocklist>,
    max_content_chars: usize,
    /// Blocklist rejections, counted separately from fetch failures.
    blocked_rejections: AtomicU64,
}

impl ContentFetcher {
    /// Build a fetcher. Fails only on HTTP client construction.
    pub fn new(
        config: FetcherConfig,
        blocklist: Arc<Blocklist>,
        cache: Arc<MemoryCache>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.timeout);

        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(&proxy.url)
                .map_err(|e| SourcestreamError::Network(format!("invalid proxy url: {e}")))?
                .basic_auth(&proxy.username, &proxy.password);
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| SourcestreamError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            cache,
            blocklist,
            max_content_chars: config.max_content_chars,
            blocked_rejections: AtomicU64::new(0),
        })
    }

    /// Fetch one URL, classified outcome included.
    ///
    /// Order of checks: blocklist (no network), cache (no network), then the
    /// semaphore-bounded HTTP GET. Successful documents are written back to
    /// the cache best-effort.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> FetchedDocument {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unparseable candidate url");
                return FetchedDocument::failed(url, FetchErrorKind::Connection);
            }
        };

        if self.blocklist.blocks(&parsed) {
            self.blocked_rejections.fetch_add(1, Ordering::Relaxed);
            debug!("blocklisted domain rejected before fetch");
            return FetchedDocument::failed(url, FetchErrorKind::Blocked);
        }

        let key = content_key(url);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<FetchedDocument>(&cached) {
                Ok(doc) => {
                    debug!("content cache hit");
                    return doc;
                }
                Err(e) => warn!(error = %e, "undecodable cache entry, refetching"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache read failed, fetching directly"),
        }

        // Permit is held for the whole network call and released on drop,
        // including on cancellation.
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                // Only possible if the semaphore is closed, which we never do.
                warn!("fetch semaphore closed");
                return FetchedDocument::failed(url, FetchErrorKind::Connection);
            }
        };

        let doc = self.fetch_uncached(url).await;

        if doc.fetch_succeeded {
            match serde_json::to_string(&doc) {
                Ok(serialized) => {
                    if let Err(e) = self.cache.set(&key, &serialized, PAGE_TTL).await {
                        warn!(error = %e, "cache write failed");
                    }
                }
                Err(e) => warn!(error = %e, "cache serialization failed"),
            }
        }

        doc
    }

    /// Number of candidates rejected by the blocklist.
    pub fn blocked_rejections(&self) -> u64 {
        self.blocked_rejections.load(Ordering::Relaxed)
    }

    async fn fetch_uncached(&self, url: &str) -> FetchedDocument {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_transport_error(&e);
                debug!(error = %e, %kind, "fetch transport failure");
                return FetchedDocument::failed(url, kind);
            }
        };

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            debug!(status = status.as_u16(), %kind, "fetch rejected by origin");
            return FetchedDocument::failed(url, kind);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "body read failed");
                return FetchedDocument::failed(url, FetchErrorKind::Connection);
            }
        };

        // Floors are in characters, not bytes; multibyte pages must not be
        // over-measured.
        if body.chars().count() < MIN_CONTENT_CHARS {
            debug!(len = body.len(), "insufficient raw body");
            return FetchedDocument::failed(url, FetchErrorKind::InsufficientContent);
        }

        let extracted = extract::extract_text(&body, self.max_content_chars);

        if extracted.content.chars().count() < MIN_CONTENT_CHARS {
            // A thin page carrying an interstitial marker is bot detection,
            // not a genuinely empty page.
            let lower = body.to_lowercase();
            let kind = if BOT_MARKERS.iter().any(|m| lower.contains(m)) {
                FetchErrorKind::Blocked
            } else {
                FetchErrorKind::InsufficientContent
            };
            debug!(len = extracted.content.len(), %kind, "insufficient extracted text");
            return FetchedDocument::failed(url, kind);
        }

        let content_length = extracted.content.len();
        FetchedDocument {
            url: url.to_string(),
            title: extracted.title,
            content: extracted.content,
            content_length,
            fetch_succeeded: true,
            error: None,
        }
    }
}

/// Map a reqwest transport error onto the failure taxonomy.
fn classify_transport_error(e: &reqwest::Error) -> FetchErrorKind {
    if e.is_timeout() {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Connection
    }
}

/// Map a non-success status onto the failure taxonomy; `None` for success.
fn classify_status(status: StatusCode) -> Option<FetchErrorKind> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::FORBIDDEN => FetchErrorKind::Blocked,
        StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
        _ => FetchErrorKind::HttpStatus,
    })
}
