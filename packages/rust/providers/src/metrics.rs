//! Domain-traffic estimates over a SEMrush-compatible CSV API.
//!
//! Traffic only orders and annotates results, so every failure mode here
//! degrades to an estimate of 0 rather than an error: missing API key,
//! network failure, `ERROR`-prefixed body, or an unparseable report all
//! yield 0. Lookups are per apex domain and cached for six hours.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use sourcestream_cache::{MemoryCache, TRAFFIC_TTL, traffic_key};
use sourcestream_shared::{Result, SourcestreamError};

/// Extract the lookup domain from a URL: host, lowercased, `www.` stripped.
pub fn domain_for_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Client for the domain-traffic metrics API.
pub struct TrafficClient {
    client: Client,
    base_url: String,
    /// Absent key disables lookups entirely (estimates become 0).
    api_key: Option<String>,
    database: String,
    cache: Arc<MemoryCache>,
}

impl TrafficClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        database: impl Into<String>,
        timeout: Duration,
        cache: Arc<MemoryCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourcestreamError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            database: database.into(),
            cache,
        })
    }

    /// Monthly organic-traffic estimate for the domain of `url`. Never fails;
    /// unknown is 0.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn traffic_for_url(&self, url: &str) -> u64 {
        let Some(domain) = domain_for_url(url) else {
            return 0;
        };
        self.domain_traffic(&domain).await
    }

    /// Monthly organic-traffic estimate for an apex domain.
    pub async fn domain_traffic(&self, domain: &str) -> u64 {
        let Some(api_key) = &self.api_key else {
            return 0;
        };

        let key = traffic_key(domain);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(traffic) = cached.parse::<u64>() {
                    debug!(domain, traffic, "traffic cache hit");
                    return traffic;
                }
                warn!(domain, "undecodable cached traffic value, refetching");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "traffic cache read failed"),
        }

        // Only definitive answers go into the cache; a transient lookup
        // failure must not pin 0 for the whole TTL.
        let traffic = match self.fetch_traffic(api_key, domain).await {
            Ok(traffic) => traffic,
            Err(e) => {
                warn!(domain, error = %e, "traffic lookup failed");
                return 0;
            }
        };

        if let Err(e) = self.cache.set(&key, &traffic.to_string(), TRAFFIC_TTL).await {
            warn!(error = %e, "traffic cache write failed");
        }
        traffic
    }

    async fn fetch_traffic(&self, api_key: &str, domain: &str) -> Result<u64> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", api_key),
                ("type", "domain_ranks"),
                ("export_columns", "Ot"),
                ("domain", domain),
                ("database", &self.database),
            ])
            .send()
            .await;

        let body = match response {
            Ok(response) if response.status().is_success() => response
                .text()
                .await
                .map_err(|e| SourcestreamError::Metrics(format!("body read failed: {e}")))?,
            Ok(response) => {
                return Err(SourcestreamError::Metrics(format!(
                    "request rejected with status {}",
                    response.status().as_u16()
                )));
            }
            Err(e) => {
                return Err(SourcestreamError::Metrics(format!("request failed: {e}")));
            }
        };

        Ok(parse_traffic_report(&body))
    }
}

/// Parse a one-column `domain_ranks` CSV report into a traffic count.
///
/// The report is a header line followed by one data row. `ERROR`-prefixed
/// bodies, header-only reports, and non-numeric rows all parse to 0.
fn parse_traffic_report(body: &str) -> u64 {
    let body = body.trim();
    if body.is_empty() || body.starts_with("ERROR") {
        return 0;
    }

    body.lines()
        .skip(1)
        .find_map(|line| line.split(';').next_back()?.trim().parse::<u64>().ok())
        .unwrap_or(0)
}
